use serde::{Deserialize, Serialize};

const UNKNOWN: &str = "Unknown";

/// Song as it appears in upstream `randomSongs` and `searchResult3` lists.
#[derive(Debug, Deserialize, PartialEq)]
pub struct ClientSong {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(rename = "coverArt", default)]
    pub cover_art: Option<String>,
}

/// The song shape handed to the player page.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SongRef {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(rename = "coverArt")]
    pub cover_art: String,
}

impl ClientSong {
    /// Map to the player shape. Songs without an id cannot be played and are dropped.
    pub fn into_song_ref(self) -> Option<SongRef> {
        let id = self.id.filter(|id| !id.is_empty())?;
        let cover_art = self
            .cover_art
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| id.clone());

        Some(SongRef {
            title: self.title.unwrap_or_else(|| UNKNOWN.to_string()),
            artist: self.artist.unwrap_or_else(|| UNKNOWN.to_string()),
            cover_art,
            id,
        })
    }
}
