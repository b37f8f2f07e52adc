//! Stands in for the console logger when the `logging` feature is off.

use crate::log::LogConfiguration;

impl LogConfiguration {
    /// Sets the global logger to conform to this `LogConfiguration`.
    pub(in crate::log) fn set_config(&mut self) {
        // Nothing is installed, but `log::max_level` still gates the macros.
        log::set_max_level(self.global_log_level);
    }
}
