pub mod descriptor;
pub mod endpoint;
pub mod error;
pub mod options;

pub use descriptor::{DatasetDescriptor, DatasetLocator};
pub use endpoint::{Endpoint, Scheme};
pub use error::{CoreError, Result};
pub use options::{ConnectionOptions, RetryDelays, RetryPolicy};
