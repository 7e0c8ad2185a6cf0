pub mod delivery;
pub mod dispatcher;
pub mod health;
pub mod notifications;
pub mod portal;
pub mod provider;
pub mod render;
pub mod scheduler;
