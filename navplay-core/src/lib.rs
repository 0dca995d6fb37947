//! Upstream side of the navplay web player: configuration, Subsonic
//! authentication, the API client and the media relay.

pub mod auth;
pub mod config;
pub mod ids;
pub mod models;
pub mod relay;
pub mod subsonic_client;

pub use config::{AuthMode, ConfigError, Credentials, RawUpstreamConfig, Secret, UpstreamConfig};
pub use ids::{InvalidItemId, ItemId};
pub use models::SongRef;
pub use relay::{relay, upstream_failure, ByteRange, MediaKind};
pub use subsonic_client::{SubsonicClient, SubsonicClientError, MAX_SONGS};
