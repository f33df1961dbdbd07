//! The backend for a student volunteering nonprofit and its school branches.

pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod graphql;
pub mod models;
pub mod routes;
pub mod storage;
pub mod util;

#[cfg(test)]
mod tests {
    pub mod mock;
}
