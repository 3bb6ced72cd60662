pub mod db;
pub mod deposits;
mod error;
pub mod household;
mod id;
pub mod identity;
pub mod logging;
pub mod migrate;
pub mod mirror;
pub mod session;
pub mod settlement;
pub mod state;
mod time;
mod util;
pub mod verification;

pub use error::{Error, Result};
pub use household::{CurrentHousehold, Household, MemberRow, Membership, Role};
pub use identity::{Account, AuthEvent, AuthSession, Identity, Profile, SignUp};
pub use mirror::StoreHandle;
pub use session::{Caller, Navigator, NoopNavigator, Resolver};
pub use settlement::{DebtRequest, RequestStatus};
pub use state::AppState;
