mod error;
mod rate_limit;
mod routes;
mod state;

pub use error::{ApiError, ErrorBody};
pub use rate_limit::client_key;
pub use routes::{router, RegistrationView};
pub use state::AppState;
