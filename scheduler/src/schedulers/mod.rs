mod wfq;
pub use wfq::Wfq;
