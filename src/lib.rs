pub mod bridge;
pub mod config;
pub mod error;
pub mod eventstream;
pub mod observability;
pub mod protocol;
pub mod stream;

mod util;

pub use bridge::{collect_message, sse_response, translate_stream};
pub use error::BridgeError;
pub use eventstream::{Frame, FrameDecoder, FrameError};
pub use stream::StreamContext;
