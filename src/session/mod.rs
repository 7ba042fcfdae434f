//! Session state: cookies, the derived session context and token material

pub mod context;
pub mod cookies;
pub mod scraper;
pub mod token_store;

pub use context::{TokenMaterial, UserSessionContext};
pub use cookies::{Cookie, CookieInput, CookieJar, CookieRecord};
pub use scraper::{PageScraper, SessionScraper, CHECKPOINT_MARKER};
pub use token_store::{refresh_dtsg, TokenStore};
