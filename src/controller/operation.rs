//! The canonical endpoints and the static operation table that drives the executor.

use crate::auth::AccessAction;
use crate::config::ValidationTarget;
use axum::http::{Method, StatusCode};
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    CreateOne,
    FindMany,
    CreateMany,
    UpdateMany,
    DeleteMany,
    FindOne,
    UpdateOne,
    DeleteOne,
    BatchUpdate,
    BatchDelete,
}

impl Endpoint {
    pub const COUNT: usize = 10;

    /// Registration order for every model.
    pub const ALL: [Endpoint; Endpoint::COUNT] = [
        Endpoint::CreateOne,
        Endpoint::FindMany,
        Endpoint::CreateMany,
        Endpoint::UpdateMany,
        Endpoint::DeleteMany,
        Endpoint::BatchUpdate,
        Endpoint::BatchDelete,
        Endpoint::FindOne,
        Endpoint::UpdateOne,
        Endpoint::DeleteOne,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::CreateOne => "createOne",
            Endpoint::FindMany => "findMany",
            Endpoint::CreateMany => "createMany",
            Endpoint::UpdateMany => "updateMany",
            Endpoint::DeleteMany => "deleteMany",
            Endpoint::FindOne => "findOne",
            Endpoint::UpdateOne => "updateOne",
            Endpoint::DeleteOne => "deleteOne",
            Endpoint::BatchUpdate => "batchUpdate",
            Endpoint::BatchDelete => "batchDelete",
        }
    }

    /// Name as it appears inside interceptor slots (`beforeCreateOne`).
    pub fn pascal_name(self) -> &'static str {
        match self {
            Endpoint::CreateOne => "CreateOne",
            Endpoint::FindMany => "FindMany",
            Endpoint::CreateMany => "CreateMany",
            Endpoint::UpdateMany => "UpdateMany",
            Endpoint::DeleteMany => "DeleteMany",
            Endpoint::FindOne => "FindOne",
            Endpoint::UpdateOne => "UpdateOne",
            Endpoint::DeleteOne => "DeleteOne",
            Endpoint::BatchUpdate => "BatchUpdate",
            Endpoint::BatchDelete => "BatchDelete",
        }
    }

    pub fn from_name(s: &str) -> Option<Endpoint> {
        Endpoint::ALL.into_iter().find(|e| e.name() == s)
    }

    pub fn from_pascal_name(s: &str) -> Option<Endpoint> {
        Endpoint::ALL.into_iter().find(|e| e.pascal_name() == s)
    }

    pub fn method(self) -> Method {
        match self {
            Endpoint::CreateOne | Endpoint::CreateMany => Method::POST,
            Endpoint::FindMany | Endpoint::FindOne => Method::GET,
            Endpoint::UpdateMany | Endpoint::UpdateOne | Endpoint::BatchUpdate => Method::PATCH,
            Endpoint::DeleteMany | Endpoint::DeleteOne | Endpoint::BatchDelete => Method::DELETE,
        }
    }

    /// Path below the model's collection path.
    pub fn path_suffix(self) -> &'static str {
        match self {
            Endpoint::CreateOne | Endpoint::FindMany => "",
            Endpoint::CreateMany | Endpoint::UpdateMany | Endpoint::DeleteMany => "/many",
            Endpoint::BatchUpdate | Endpoint::BatchDelete => "/batch",
            Endpoint::FindOne | Endpoint::UpdateOne | Endpoint::DeleteOne => "/:id",
        }
    }

    pub fn access_action(self) -> AccessAction {
        match self {
            Endpoint::CreateOne | Endpoint::CreateMany => AccessAction::Create,
            Endpoint::FindMany | Endpoint::FindOne => AccessAction::View,
            Endpoint::UpdateMany | Endpoint::UpdateOne | Endpoint::BatchUpdate => AccessAction::Update,
            Endpoint::DeleteMany | Endpoint::DeleteOne | Endpoint::BatchDelete => AccessAction::Delete,
        }
    }

    /// Static query-option group key (`find`, `create`, `update`, `delete`).
    pub fn group(self) -> &'static str {
        match self.access_action() {
            AccessAction::Create => "create",
            AccessAction::View => "find",
            AccessAction::Update => "update",
            _ => "delete",
        }
    }

    /// Body validation target, for endpoints that write a body.
    pub fn validation_target(self) -> Option<ValidationTarget> {
        match self {
            Endpoint::CreateOne | Endpoint::CreateMany => Some(ValidationTarget::Create),
            Endpoint::UpdateOne | Endpoint::UpdateMany | Endpoint::BatchUpdate => Some(ValidationTarget::Update),
            _ => None,
        }
    }

    /// Endpoints addressing one record through `/:id`.
    pub fn is_singular(self) -> bool {
        matches!(self, Endpoint::FindOne | Endpoint::UpdateOne | Endpoint::DeleteOne)
    }

    pub fn config(self) -> &'static OperationConfig {
        &OPERATIONS[self as usize]
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Endpoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryFeature {
    Filter,
    Sort,
    LimitFields,
    Paginate,
}

/// Success body family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{data}`
    Single,
    /// `{total, results, data}`
    Paginated,
    /// `{results: count, data}`
    BulkCount,
    /// `{results: data.length, data}`
    BatchArray,
    /// No body; the record travels as additional data.
    Empty,
}

#[derive(Debug)]
pub struct OperationConfig {
    pub endpoint: Endpoint,
    pub service_method_name: &'static str,
    pub success_status: StatusCode,
    pub query_features: &'static [QueryFeature],
    pub requires_non_empty_filter_for_bulk: bool,
    pub forbid_or_filter_mode: bool,
    pub shape: ResponseShape,
}

impl OperationConfig {
    pub fn uses(&self, feature: QueryFeature) -> bool {
        self.query_features.contains(&feature)
    }
}

const LIST_FEATURES: &[QueryFeature] = &[
    QueryFeature::Filter,
    QueryFeature::Sort,
    QueryFeature::LimitFields,
    QueryFeature::Paginate,
];
const SINGLE_FEATURES: &[QueryFeature] = &[QueryFeature::Filter, QueryFeature::LimitFields];
const FILTER_ONLY: &[QueryFeature] = &[QueryFeature::Filter];
const PROJECTION_ONLY: &[QueryFeature] = &[QueryFeature::LimitFields];

/// One entry per endpoint, in `Endpoint` declaration order.
pub static OPERATIONS: [OperationConfig; Endpoint::COUNT] = [
    OperationConfig {
        endpoint: Endpoint::CreateOne,
        service_method_name: "create_one",
        success_status: StatusCode::CREATED,
        query_features: PROJECTION_ONLY,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: false,
        shape: ResponseShape::Single,
    },
    OperationConfig {
        endpoint: Endpoint::FindMany,
        service_method_name: "find_many",
        success_status: StatusCode::OK,
        query_features: LIST_FEATURES,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: false,
        shape: ResponseShape::Paginated,
    },
    OperationConfig {
        endpoint: Endpoint::CreateMany,
        service_method_name: "create_many",
        success_status: StatusCode::CREATED,
        query_features: &[],
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: false,
        shape: ResponseShape::BulkCount,
    },
    OperationConfig {
        endpoint: Endpoint::UpdateMany,
        service_method_name: "update_many",
        success_status: StatusCode::OK,
        query_features: FILTER_ONLY,
        requires_non_empty_filter_for_bulk: true,
        forbid_or_filter_mode: true,
        shape: ResponseShape::BulkCount,
    },
    OperationConfig {
        endpoint: Endpoint::DeleteMany,
        service_method_name: "delete_many",
        success_status: StatusCode::OK,
        query_features: FILTER_ONLY,
        requires_non_empty_filter_for_bulk: true,
        forbid_or_filter_mode: true,
        shape: ResponseShape::BulkCount,
    },
    OperationConfig {
        endpoint: Endpoint::FindOne,
        service_method_name: "find_one",
        success_status: StatusCode::OK,
        query_features: SINGLE_FEATURES,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: false,
        shape: ResponseShape::Single,
    },
    OperationConfig {
        endpoint: Endpoint::UpdateOne,
        service_method_name: "update_one",
        success_status: StatusCode::OK,
        query_features: SINGLE_FEATURES,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: false,
        shape: ResponseShape::Single,
    },
    OperationConfig {
        endpoint: Endpoint::DeleteOne,
        service_method_name: "delete_one",
        success_status: StatusCode::NO_CONTENT,
        query_features: FILTER_ONLY,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: false,
        shape: ResponseShape::Empty,
    },
    OperationConfig {
        endpoint: Endpoint::BatchUpdate,
        service_method_name: "batch_update",
        success_status: StatusCode::OK,
        query_features: FILTER_ONLY,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: true,
        shape: ResponseShape::BatchArray,
    },
    OperationConfig {
        endpoint: Endpoint::BatchDelete,
        service_method_name: "batch_delete",
        success_status: StatusCode::OK,
        query_features: FILTER_ONLY,
        requires_non_empty_filter_for_bulk: false,
        forbid_or_filter_mode: true,
        shape: ResponseShape::BatchArray,
    },
];
