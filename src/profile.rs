//! Explicit scoped timing context.
//!
//! Components receive a `&mut Profile` and bracket their phases with
//! [`Profile::tic`]/[`Profile::toc`]; the accumulated report is returned to
//! the caller instead of living in process-wide state.

use std::fmt;
use std::time::{Duration, Instant};

/// Accumulates named wall-clock sections.
#[derive(Debug, Default)]
pub struct Profile {
    sections: Vec<(&'static str, Duration)>,
    open: Vec<(&'static str, Instant)>,
}

impl Profile {
    /// Creates an empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a named section. Sections may nest; each `tic` must be closed
    /// by a matching [`toc`](Self::toc) with the same name.
    pub fn tic(&mut self, name: &'static str) {
        self.open.push((name, Instant::now()));
    }

    /// Closes the innermost open section and accumulates its elapsed time.
    ///
    /// # Panics
    ///
    /// Panics when `name` does not match the innermost open section; that is
    /// a programming error in the instrumented component.
    pub fn toc(&mut self, name: &'static str) {
        let (open_name, start) = self
            .open
            .pop()
            .unwrap_or_else(|| panic!("toc(\"{name}\") without a matching tic"));
        assert_eq!(open_name, name, "mismatched tic/toc pair");
        let elapsed = start.elapsed();
        match self.sections.iter_mut().find(|(n, _)| *n == name) {
            Some((_, total)) => *total += elapsed,
            None => self.sections.push((name, elapsed)),
        }
    }

    /// Total time accumulated under `name`, if the section was ever closed.
    pub fn elapsed(&self, name: &str) -> Option<Duration> {
        self.sections
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, d)| *d)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[profile]")?;
        for (name, d) in &self.sections {
            writeln!(f, "  {name:<12} {:10.3} ms", d.as_secs_f64() * 1e3)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_repeated_sections() {
        let mut prof = Profile::new();
        prof.tic("solve");
        prof.toc("solve");
        prof.tic("solve");
        prof.toc("solve");
        assert!(prof.elapsed("solve").is_some());
        assert!(prof.elapsed("setup").is_none());
        assert!(format!("{prof}").contains("solve"));
    }

    #[test]
    fn nested_sections_close_in_order() {
        let mut prof = Profile::new();
        prof.tic("outer");
        prof.tic("inner");
        prof.toc("inner");
        prof.toc("outer");
        assert!(prof.elapsed("inner").unwrap() <= prof.elapsed("outer").unwrap());
    }
}
