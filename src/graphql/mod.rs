use async_graphql::{EmptySubscription, Schema};

use crate::graphql::mutation::MutationRoot;
use crate::graphql::query::QueryRoot;

pub mod guards;
pub mod mutation;
pub mod query;

pub const SUCCESS_MESSAGE: &str = "success";

pub type VolunteerSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema() -> VolunteerSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription).finish()
}
