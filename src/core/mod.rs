pub mod audio;
pub mod realtime;

pub use audio::{AudioBackend, AudioCapture, AudioPlayback, MemoryAudioBackend, TrackOffset};
pub use realtime::{
    BoxedTransport, OpenAIRealtime, RealtimeConfig, RealtimeError, RealtimeResult,
    RealtimeTransport, TransportEvent,
};
