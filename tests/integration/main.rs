#![allow(clippy::module_name_repetitions)]
#![forbid(non_ascii_idents, unsafe_code)]

mod detector;
mod fakes;
mod manager;

use std::time::Duration;

use medea_meeting_experience::conf;

/// Polls `$name` [`Stream`] until finds provided `$pattern`.
///
/// When provided `$pattern` found - executes provided `$body`.
///
/// This macro can be used only in the `async` blocks.
///
/// [`Stream`]: futures::Stream
#[macro_export]
macro_rules! if_let_next {
    ($pattern:pat = $name:ident $body:block ) => {
        loop {
            match $name.next().await {
                Some($pattern) => {
                    $body;
                    break;
                }
                Some(_) => (),
                None => panic!("stream ended before matching event"),
            }
        }
    };
}

/// [`conf::Detector`] with stats polled every second and experience
/// evaluated every two seconds.
pub fn detector_conf() -> conf::Detector {
    conf::Detector {
        poll_interval: Duration::from_secs(1),
        eval_interval: Duration::from_secs(2),
        ..conf::Detector::default()
    }
}
