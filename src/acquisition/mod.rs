// src/acquisition/mod.rs
// 采集线程一侧：数据块、环形缓冲、尖峰检测与分类
pub mod continuous;
pub mod detector;
pub mod electrode;
pub mod error;
pub mod pipeline;
pub mod sorting;
pub mod source;
pub mod spike_buffer;
pub use continuous::{ContinuousCircularBuffer, ContinuousWindow};
pub use detector::{ElectrodeObserver, SpikeDetector};
pub use electrode::{Electrode, ElectrodeInfo, SpikeObject};
pub use error::CoreError;
pub use pipeline::AcquisitionPipeline;
pub use sorting::{AmplitudeBox, AmplitudeBoxClassifier, UnitClassifier};
pub use source::{ManualSource, SampleBlock, SignalSource, SimulatedSource, SimulationParams};
pub use spike_buffer::{SpikeCircularBuffer, TimeFrame};
