use birthbook_types::{NewUser, User, UserFieldError};
use parking_lot::RwLock;
use sled::transaction::{abort, TransactionError};
use sled::{Db, IVec, Transactional, Tree};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Column that carries a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Phone,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Phone => f.write_str("phone"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(UniqueField),
    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] UserFieldError),
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt index: {0}")]
    Corrupt(String),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => StoreError::Database(inner),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Abstract user record store.
pub trait UserStore: Send + Sync {
    /// Persists a record and assigns its id. Fails with
    /// [`StoreError::Conflict`] when phone or email is already taken; the
    /// check and the write happen atomically.
    fn insert(&self, user: NewUser) -> StoreResult<User>;
    fn get(&self, id: u64) -> StoreResult<Option<User>>;
    /// Returns the earliest inserted record with this name.
    fn find_by_name(&self, name: &str) -> StoreResult<Option<User>>;
    fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;
    fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn count(&self) -> StoreResult<u64>;
    fn flush(&self) -> StoreResult<()>;

    /// Inserts `records` only if the store holds no users yet. Returns the
    /// number of records written.
    fn seed_if_empty(&self, records: Vec<NewUser>) -> StoreResult<usize> {
        if self.count()? > 0 {
            tracing::debug!("Store already populated; skipping seed");
            return Ok(0);
        }
        let mut inserted = 0;
        for record in records {
            self.insert(record)?;
            inserted += 1;
        }
        tracing::debug!("Seeded {} records", inserted);
        Ok(inserted)
    }

    /// Prepares a freshly opened store by writing the sample users when it is
    /// empty.
    fn initialize(&self) -> StoreResult<()> {
        let seeded = self.seed_if_empty(sample_users())?;
        if seeded > 0 {
            tracing::info!("Initialized user store with {} sample users", seeded);
        }
        Ok(())
    }
}

/// Fixed sample records written into a fresh store.
pub fn sample_users() -> Vec<NewUser> {
    vec![
        NewUser::new(
            "Alan",
            20061007,
            Some("13800138000".to_string()),
            Some("alan@example.com".to_string()),
        ),
        NewUser::new(
            "Bob",
            19950815,
            Some("13900139000".to_string()),
            Some("bob@example.com".to_string()),
        ),
    ]
}

/// Sled-backed implementation
pub struct SledStorage {
    db: Db,
    users: Tree,
    by_name: Tree,
    by_phone: Tree,
    by_email: Tree,
}

impl SledStorage {
    /// Opens the database at `path`, creating it if absent.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        let users = db.open_tree("users")?;
        let by_name = db.open_tree("users_by_name")?;
        let by_phone = db.open_tree("users_by_phone")?;
        let by_email = db.open_tree("users_by_email")?;

        Ok(Self {
            db,
            users,
            by_name,
            by_phone,
            by_email,
        })
    }

    fn load(&self, id: u64) -> StoreResult<Option<User>> {
        self.users
            .get(id.to_be_bytes())?
            .map(|v| serde_json::from_slice(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn load_indexed(&self, pointer: Option<IVec>) -> StoreResult<Option<User>> {
        let Some(raw) = pointer else {
            return Ok(None);
        };
        let id = decode_id(&raw)?;
        match self.load(id)? {
            Some(user) => Ok(Some(user)),
            None => Err(StoreError::Corrupt(format!("index points at missing user {id}"))),
        }
    }
}

impl UserStore for SledStorage {
    fn insert(&self, user: NewUser) -> StoreResult<User> {
        user.validate()?;

        let id = self.db.generate_id()? + 1;
        let user = user.into_user(id);
        let id_key = id.to_be_bytes();
        let data = serde_json::to_vec(&user)?;
        let name_key = name_index_key(&user.name, id);

        (&self.users, &self.by_name, &self.by_phone, &self.by_email).transaction(
            |(users, by_name, by_phone, by_email)| {
                if let Some(phone) = &user.phone {
                    if by_phone.get(phone.as_bytes())?.is_some() {
                        return abort(StoreError::Conflict(UniqueField::Phone));
                    }
                    by_phone.insert(phone.as_bytes(), &id_key[..])?;
                }
                if let Some(email) = &user.email {
                    if by_email.get(email.as_bytes())?.is_some() {
                        return abort(StoreError::Conflict(UniqueField::Email));
                    }
                    by_email.insert(email.as_bytes(), &id_key[..])?;
                }
                by_name.insert(name_key.as_slice(), &id_key[..])?;
                users.insert(&id_key[..], data.as_slice())?;
                Ok(())
            },
        )?;

        Ok(user)
    }

    fn get(&self, id: u64) -> StoreResult<Option<User>> {
        self.load(id)
    }

    fn find_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let first = self.by_name.scan_prefix(name_index_prefix(name)).next();
        match first {
            Some(entry) => {
                let (_, pointer) = entry?;
                self.load_indexed(Some(pointer))
            }
            None => Ok(None),
        }
    }

    fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let pointer = self.by_phone.get(phone.as_bytes())?;
        self.load_indexed(pointer)
    }

    fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let pointer = self.by_email.get(email.as_bytes())?;
        self.load_indexed(pointer)
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.users.len() as u64)
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// Length-prefixed so that one name is never a key prefix of another.
fn name_index_prefix(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + name.len() + 8);
    key.extend_from_slice(&(name.len() as u32).to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

fn name_index_key(name: &str, id: u64) -> Vec<u8> {
    let mut key = name_index_prefix(name);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

fn decode_id(raw: &[u8]) -> StoreResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected 8-byte id, got {}", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

#[derive(Default)]
struct MemoryTables {
    users: BTreeMap<u64, User>,
    next_id: u64,
}

/// In-memory testing backend
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<MemoryTables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_where<F>(&self, predicate: F) -> StoreResult<Option<User>>
    where
        F: Fn(&User) -> bool,
    {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| predicate(u))
            .cloned())
    }
}

impl UserStore for MemoryStorage {
    fn insert(&self, user: NewUser) -> StoreResult<User> {
        user.validate()?;

        let mut tables = self.tables.write();
        // Phone is checked across all records before email, as in the sled backend.
        if user.phone.is_some() && tables.users.values().any(|u| u.phone == user.phone) {
            return Err(StoreError::Conflict(UniqueField::Phone));
        }
        if user.email.is_some() && tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(UniqueField::Email));
        }

        tables.next_id += 1;
        let user = user.into_user(tables.next_id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn get(&self, id: u64) -> StoreResult<Option<User>> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    fn find_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        self.find_where(|u| u.name == name)
    }

    fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        self.find_where(|u| u.phone.as_deref() == Some(phone))
    }

    fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.find_where(|u| u.email.as_deref() == Some(email))
    }

    fn count(&self) -> StoreResult<u64> {
        Ok(self.tables.read().users.len() as u64)
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}
