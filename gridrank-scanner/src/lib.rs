pub mod error;
pub mod geo;
pub mod places;
pub mod probe;
pub mod proxy;
pub mod result;

pub use error::ScanError;
pub use geo::GeoPoint;
pub use places::{HttpPointSource, PointSource, StaticPointSource};
pub use probe::{HttpRankProbe, RankProbe, RankQuery};
pub use proxy::{ProxyCandidate, ProxyValidator, Vantage, VantagePool};
pub use result::{ProbeOutcome, ProxyStatus};
