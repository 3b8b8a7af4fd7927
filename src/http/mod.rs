mod coordinator;
mod dispatcher;
mod error;
mod request;

pub use coordinator::{RefreshHooks, TokenRefreshCoordinator, REFRESH_PATH};
pub use dispatcher::{Dispatcher, ReqwestDispatcher};
pub use error::{HttpError, RefreshError};
pub use request::{HttpResponse, RequestDescriptor};
