pub mod url_validation;
pub use url_validation::{EndpointKind, UrlValidationError, validate_service_url};
