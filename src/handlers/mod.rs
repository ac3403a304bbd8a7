pub mod health_handlers;
pub mod processing_handlers;
pub mod results_handlers;
pub mod upload_handlers;
