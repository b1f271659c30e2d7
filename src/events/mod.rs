//! # Events Module
//!
//! Progress reporting decoupled from the core library.
//!
//! ## Design
//! The core library emits events through channels, allowing any front end
//! (the CLI progress bars, a log, a test) to subscribe and display progress.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Scan(ScanEvent::Progress(p)) => println!("{} files", p.files_seen),
//!             Event::Extract(ExtractEvent::Progress(p)) => println!("{}/{}", p.completed, p.total),
//!             _ => {}
//!         }
//!     }
//! });
//!
//! pipeline.run_with_events(&sender)?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
