pub mod cancel;
pub mod captcha;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod form;
pub mod http;
pub mod notify;
pub mod punch;
pub mod schedule;
pub mod scrape;
pub mod session;
