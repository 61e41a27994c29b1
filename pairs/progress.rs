use std::fmt;

/// Stages reported while producing and merging results.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PairProgressStage {
    Batch,
    Plan,
    Compile,
}

impl PairProgressStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Batch => "pair batch",
            Self::Plan => "range plan",
            Self::Compile => "artifact compilation",
        }
    }
}

impl fmt::Display for PairProgressStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for incremental progress. Counts are pairs for batches, ranges for plans and
/// artifacts for compilation.
pub trait PairProgressObserver {
    fn on_stage_start(&mut self, stage: PairProgressStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_stage_advance(&mut self, stage: PairProgressStage, processed: usize) {
        let _ = (stage, processed);
    }
    fn on_stage_finish(&mut self, stage: PairProgressStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopPairProgress;

impl PairProgressObserver for NoopPairProgress {}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records every callback so tests can assert on the reported sequence.
    #[derive(Default)]
    pub(crate) struct RecordingProgress {
        pub(crate) events: Vec<(PairProgressStage, &'static str, usize)>,
    }

    impl PairProgressObserver for RecordingProgress {
        fn on_stage_start(&mut self, stage: PairProgressStage, total: usize) {
            self.events.push((stage, "start", total));
        }
        fn on_stage_advance(&mut self, stage: PairProgressStage, processed: usize) {
            self.events.push((stage, "advance", processed));
        }
        fn on_stage_finish(&mut self, stage: PairProgressStage) {
            self.events.push((stage, "finish", 0));
        }
    }

    #[test]
    fn stages_describe_themselves() {
        assert_eq!(PairProgressStage::Compile.to_string(), "artifact compilation");
        let mut noop = NoopPairProgress;
        noop.on_stage_start(PairProgressStage::Batch, 10);
        noop.on_stage_finish(PairProgressStage::Batch);
    }
}
