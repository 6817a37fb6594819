pub mod farm;
pub mod learning;
pub mod run;
pub mod series;

pub use farm::{DateRangeInfo, DateResult, DateStatus, FarmLink, FarmRecord, RunOutput};
pub use learning::{AveragedOffsets, ClickPoint, LearningSample, SlotPair};
pub use run::{Credentials, Mode, ProgressSnapshot, RunConfig, RunJournalEntry};
pub use series::{IrrigationEvent, Point, SensorSeries, MIN_POINTS};
