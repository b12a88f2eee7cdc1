//! Client core for the Flowdeck embedded chat bridge.
//!
//! A published workflow can be test-chatted from the canvas through an
//! embedded chat surface. This crate holds the browser-agnostic pieces of
//! that bridge: the publish-token store and its source-precedence
//! resolution, the request context projected onto outbound headers, the
//! HTTP failure classification shared with the fetch adapter, and the
//! session continuity state machine that decides when a conversation
//! thread survives a panel re-open.
//!
//! Everything environment-shaped (location/history access, the widget's
//! lifecycle handles, the HTTP transport) sits behind traits so hosts can
//! bind a real browser surface and tests can bind fakes.

pub mod context;
pub mod outcome;
pub mod session;
pub mod token;

pub use context::{ACTOR_EMBEDDED_CHAT, RequestContext};
pub use outcome::FetchClassification;
pub use session::{ChatSurface, OpenTransition, PanelPhase, SessionContinuity};
pub use token::{
    PublishTokenStore, TokenEnvironment, TokenResolution, TokenSource, UrlScrub,
};
