/// Tells layers which kind of pass is running. Layers with stochastic
/// behavior (e.g. dropout) are only active in `Train`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
    Deploy,
}

impl Phase {
    pub fn is_training(self) -> bool {
        matches!(self, Phase::Train)
    }
}
