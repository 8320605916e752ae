//! Route construction: descriptors, interceptor chains, custom routers and the assembly
//! that mounts them.

mod assembly;
mod custom;
mod descriptor;
mod middleware;
pub mod path;

pub use assembly::{AssembledApp, RegisteredRoute, RouterAssembly};
pub use custom::{CustomRoute, CustomRouter};
pub use descriptor::{build_descriptor, RouteDescriptor};
pub use middleware::{
    compose, interceptor_fn, parse_slot, slot_name, Flow, Interceptor, InterceptorEntry, InterceptorRegistry,
    InterceptorValue, MiddlewareChain, SlotKind,
};
pub use path::canonical_path;
