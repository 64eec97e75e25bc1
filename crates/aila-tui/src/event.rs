//! Terminal input and refresh results, merged into one channel.

use aila_core::Digest;
use crossterm::event::{self, Event as CEvent, KeyEvent};
use std::sync::mpsc;
use std::time::Duration;

/// Events the TUI reacts to.
pub enum Event {
    /// A terminal key press.
    Key(KeyEvent),
    /// Terminal resize.
    Resize,
    /// Periodic tick for background updates.
    Tick,
    /// A refresh cycle finished.
    Refreshed(Result<Digest, String>),
}

/// Spawns a thread that forwards key and resize events through `tx`,
/// followed by a tick after every poll. The thread ends once the receiver
/// is gone.
pub fn spawn_event_reader(tick_rate: Duration, tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || {
        loop {
            let input = event::poll(tick_rate)
                .unwrap_or(false)
                .then(event::read)
                .and_then(Result::ok)
                .and_then(translate);
            let delivered = input.map_or(Ok(()), |e| tx.send(e)).and_then(|()| tx.send(Event::Tick));
            if delivered.is_err() {
                return;
            }
        }
    });
}

fn translate(event: CEvent) -> Option<Event> {
    match event {
        CEvent::Key(key) => Some(Event::Key(key)),
        CEvent::Resize(..) => Some(Event::Resize),
        _ => None,
    }
}
