pub mod flows;
pub mod health;
pub mod history;
pub mod metrics;
pub mod sagas;
pub mod topology;
