//! Business logic services

pub mod catalog;
pub mod circulation;
pub mod users;

use std::sync::Arc;

use crate::{
    config::{AuthConfig, CirculationConfig},
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub catalog: catalog::CatalogService,
    pub users: users::UsersService,
    pub circulation: circulation::CirculationService,
    pub repository: Repository,
}

impl Services {
    /// Create all services with the given repository
    pub fn new(
        repository: Repository,
        auth_config: AuthConfig,
        circulation_config: CirculationConfig,
    ) -> Self {
        Self {
            catalog: catalog::CatalogService::new(repository.clone()),
            users: users::UsersService::new(repository.clone(), auth_config),
            circulation: circulation::CirculationService::new(
                Arc::new(repository.circulation.clone()),
                circulation_config,
            ),
            repository,
        }
    }
}
