mod fix;
mod vendor_position;

pub(crate) use fix::parse_timestamp;
pub use fix::{Address, CoordKey, Fix, FixKey};
pub use vendor_position::{PositionsResponse, VendorPosition};
