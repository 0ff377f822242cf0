pub mod generic;
pub mod kb4;
pub mod pinhole;
pub mod radtan;

pub use generic::GenericModel;
pub use kb4::KannalaBrandt4;
pub use pinhole::Pinhole;
pub use radtan::RadTan;
