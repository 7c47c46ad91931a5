use crate::issuer::Issuer;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<Issuer>,
}

impl AppState {
    pub fn new(issuer: Issuer) -> Self {
        Self {
            issuer: Arc::new(issuer),
        }
    }
}
