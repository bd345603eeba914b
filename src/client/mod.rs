mod api;
pub mod constants;
mod types;

pub use api::{DlClient, WeakDlClient};
pub use types::DlOptions;
