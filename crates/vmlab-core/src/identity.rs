use uuid::Uuid;
use vmlab_schema::Identity;

pub const MACHINE_PREFIX: &str = "llm_";
pub const NETWORK_PREFIX: &str = "lln_";

/// Randomness behind identities and subnet draws.
pub trait IdentitySource: Send + Sync {
    fn uuid(&self) -> Uuid;

    /// Random suffix appended to a resource name prefix.
    fn token(&self) -> String;

    /// A uniformly drawn octet in `0..=254`.
    fn octet(&self) -> u8;
}

/// Network names double as bridge names, which the kernel caps at 15 bytes.
pub const MAX_NAME_LEN: usize = 15;

/// Identities drawn from v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdentity;

/// 32 random bits. The first four bytes of a v4 UUID carry no version or
/// variant bits, so they are uniformly random.
fn random_u32() -> u32 {
    let [a, b, c, d, ..] = *Uuid::new_v4().as_bytes();
    u32::from_be_bytes([a, b, c, d])
}

impl IdentitySource for RandomIdentity {
    fn uuid(&self) -> Uuid {
        Uuid::new_v4()
    }

    /// Eight hex digits, so prefixed names stay within [`MAX_NAME_LEN`].
    fn token(&self) -> String {
        format!("{:08x}", random_u32())
    }

    fn octet(&self) -> u8 {
        (random_u32() % 255) as u8
    }
}

/// Fresh identity for one creation attempt.
pub fn allocate(source: &dyn IdentitySource, prefix: &str) -> Identity {
    Identity {
        uuid: source.uuid(),
        name: format!("{prefix}{}", source.token()),
    }
}
