pub mod energy;
pub mod ev_charger;
pub mod goal;
pub mod load;
pub mod plan;
pub mod price;
pub mod sensors;
pub mod settings;

pub use energy::*;
pub use ev_charger::*;
pub use goal::*;
pub use load::*;
pub use plan::*;
pub use price::*;
pub use sensors::*;
pub use settings::*;
