use std::ops::Range;

use rand::Rng;

/// Chooses the port a runner is asked to listen on, once per spawn attempt.
pub trait PortSelector: Send {
    fn select(&mut self, range: &Range<u16>) -> u16;
}

/// Draws ports uniformly from the configured range.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPortSelector;

impl PortSelector for RandomPortSelector {
    fn select(&mut self, range: &Range<u16>) -> u16 {
        rand::rng().random_range(range.clone())
    }
}

impl<F> PortSelector for F
where
    F: FnMut(&Range<u16>) -> u16 + Send,
{
    fn select(&mut self, range: &Range<u16>) -> u16 {
        self(range)
    }
}
