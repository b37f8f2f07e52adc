//! A console progress bar that follows the generation loop on the coordinating rank.
//!
//! Only one progress bar can be active at a time, and only rank 0 ever touches it. Log lines
//! are prefixed with a clear-line escape while the bar is active so they do not interleave
//! with it (see the log module's encoder).

use log::trace;
use progress_bar::{
    finalize_progress_bar, init_progress_bar, set_progress_bar_action, set_progress_bar_progress,
    Color, Style,
};

/// Starts a bar that completes after `generations` generations.
pub fn init_generation_progress_bar(generations: u64) {
    trace!("initializing generation progress bar with {generations} generations");
    init_progress_bar(usize::try_from(generations).unwrap_or(usize::MAX));
    set_progress_bar_action("Generation", Color::Blue, Style::Bold);
}

/// Moves the bar to `generation` and finalizes it on the last one.
pub fn update_generation_progress(generation: u64, generations: u64) {
    set_progress_bar_progress(usize::try_from(generation).unwrap_or(usize::MAX));
    if generation >= generations {
        finalize_progress_bar();
    }
}
