pub mod load;
pub mod model;
pub mod settings;

pub use load::{load_config, load_or_default};
pub use model::{ProcessModelKind, RestartPolicy, UpdaterConfig};
pub use settings::AppSettings;
