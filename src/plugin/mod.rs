//! Consumer plugins and the fan-out that feeds them

mod builtin;
mod dispatch;
mod registry;
mod traits;

pub use builtin::{Delivery, DeliveryPlugin, TracePlugin};
pub use dispatch::{ActiveSinks, CompletionReport, PluginDispatch};
pub use registry::{PluginCatalog, PluginRegistry};
pub use traits::{FragmentPlugin, PluginError};
