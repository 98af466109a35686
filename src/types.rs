/// Device (speaker) identifier, e.g. an ALSA name like `plughw:CARD=Generic,DEV=0`
pub type DeviceId = String;

/// Music volume in percent
pub type Volume = f32;

/// Lowest volume a device accepts
pub const MIN_VOLUME: Volume = 0.0;

/// Highest volume a device accepts
pub const MAX_VOLUME: Volume = 100.0;

/// Clamp a volume into `[0, 100]`. NaN becomes 0.
pub fn clamp_volume(volume: Volume) -> Volume {
    if volume.is_nan() {
        MIN_VOLUME
    } else {
        volume.clamp(MIN_VOLUME, MAX_VOLUME)
    }
}

/// A playlist entry
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Song {
    pub url: String,
    pub title: String,

    /// Base64-encoded thumbnail image (`thumbnail_b64` on the wire)
    pub thumbnail: String,
}

impl Song {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        thumbnail: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            thumbnail: thumbnail.into(),
        }
    }

    /// Key used to tell entries apart within one playlist
    pub fn key(&self) -> &str {
        &self.url
    }
}
