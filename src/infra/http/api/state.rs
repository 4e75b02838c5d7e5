use std::sync::Arc;

use crate::application::images::ImageService;
use crate::infra::storage::ImageStorage;

#[derive(Clone)]
pub struct ApiState {
    pub images: Arc<ImageService>,
    pub storage: Arc<ImageStorage>,
}
