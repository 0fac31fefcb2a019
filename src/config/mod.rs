mod settings;

pub use settings::{
    DeliveryConfig, MonitorConfig, RecoveryConfig, ServerConfig, Settings,
};
