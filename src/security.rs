use std::fmt;
use zeroize::{Zeroize, Zeroizing};
use crate::memutil;

/// 32 bytes of key material on the heap, mlock'ed while alive and zeroed on drop.
///
/// The bytes are boxed so that the locked address stays valid when the
/// owner moves.
pub struct SecretKey {
    bytes: Box<[u8; 32]>,
    locked: bool,
}

impl SecretKey {
    /// Takes ownership of `bytes`; the caller's copy is zeroed.
    pub fn new(bytes: &mut [u8; 32]) -> SecretKey {
        let mut boxed = Box::new([0u8; 32]);
        boxed.copy_from_slice(&bytes[..]);
        bytes.zeroize();
        let locked = memutil::lock_memory(&boxed[..]);
        SecretKey { bytes: boxed, locked }
    }

    pub fn random(random: &mut crate::context::CryptoRandom) -> SecretKey {
        let mut bytes = random.generate_random_256();
        SecretKey::new(&mut bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

}

impl Clone for SecretKey {
    fn clone(&self) -> SecretKey {
        let mut copy = *self.bytes;
        SecretKey::new(&mut copy)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            memutil::unlock_memory(&self.bytes[..]);
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Per-store XOR key for `ProtectedPassword`, with an id that tells the
/// keys of different stores apart.
#[derive(Clone, Debug)]
pub struct SessionKey {
    key: SecretKey,
    id: u64,
}

impl SessionKey {
    pub fn random(random: &mut crate::context::CryptoRandom) -> SessionKey {
        let key = SecretKey::random(random);
        let mut id = [0u8; 8];
        random.get_random_bytes(&mut id);
        SessionKey { key, id: u64::from_le_bytes(id) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }
}

/// An entry password kept XORed with the store's session key whenever it is
/// not being read. This only hides the bytes from casual memory scans.
///
/// A locked password remembers which session key locked it. Only that key
/// can unlock it or produce its plaintext.
///
/// `lock` and `unlock` are idempotent: locking a locked password does nothing.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProtectedPassword {
    data: Vec<u8>,
    locked_by: Option<u64>,
}

impl ProtectedPassword {
    /// A plaintext (unlocked) password.
    pub fn new(plaintext: &[u8]) -> ProtectedPassword {
        ProtectedPassword { data: plaintext.to_vec(), locked_by: None }
    }

    /// A password that is immediately locked with `session_key`.
    pub fn locked_with(plaintext: &[u8], session_key: &SessionKey) -> ProtectedPassword {
        let mut password = ProtectedPassword::new(plaintext);
        password.lock(session_key);
        password
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }

    /// False if the password is locked with a different session key.
    pub fn is_readable_with(&self, session_key: &SessionKey) -> bool {
        self.locked_by.map_or(true, |id| id == session_key.id())
    }

    pub fn lock(&mut self, session_key: &SessionKey) {
        if self.locked_by.is_none() {
            memutil::xor_toggle(&mut self.data, session_key.as_bytes());
            self.locked_by = Some(session_key.id());
        }
    }

    /// Does nothing if the password is unlocked or locked with another key.
    pub fn unlock(&mut self, session_key: &SessionKey) {
        if self.locked_by == Some(session_key.id()) {
            memutil::xor_toggle(&mut self.data, session_key.as_bytes());
            self.locked_by = None;
        }
    }

    /// Returns a plaintext copy without changing the lock state, or `None`
    /// if the password is locked with another session key.
    pub fn plaintext(&self, session_key: &SessionKey) -> Option<Zeroizing<Vec<u8>>> {
        if !self.is_readable_with(session_key) {
            return None;
        }
        let mut copy = Zeroizing::new(self.data.clone());
        if self.is_locked() {
            memutil::xor_toggle(&mut copy, session_key.as_bytes());
        }
        Some(copy)
    }

    /// Raw bytes in their current (possibly XORed) state.
    pub(crate) fn raw(&self) -> &[u8] {
        &self.data
    }

    /// Replaces the contents with a new plaintext, leaving the password unlocked.
    pub fn set(&mut self, plaintext: &[u8]) {
        self.data.zeroize();
        self.data = plaintext.to_vec();
        self.locked_by = None;
    }
}

impl Drop for ProtectedPassword {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

impl fmt::Debug for ProtectedPassword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ProtectedPassword(***, len={}, locked={})", self.data.len(), self.is_locked())
    }
}

/// Scoped access to an entry password: unlocked on creation, locked again on drop.
pub struct PasswordGuard<'a> {
    password: &'a mut ProtectedPassword,
    session_key: &'a SessionKey,
}

impl<'a> PasswordGuard<'a> {
    pub fn new(password: &'a mut ProtectedPassword, session_key: &'a SessionKey) -> PasswordGuard<'a> {
        password.unlock(session_key);
        PasswordGuard { password, session_key }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.password.data
    }

    /// The password as text. Invalid UTF-8 is replaced.
    pub fn to_string_lossy(&self) -> Zeroizing<String> {
        Zeroizing::new(String::from_utf8_lossy(&self.password.data).into_owned())
    }
}

impl<'a> std::ops::Deref for PasswordGuard<'a> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.password.data
    }
}

impl<'a> Drop for PasswordGuard<'a> {
    fn drop(&mut self) {
        self.password.lock(self.session_key);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::CryptoRandom;

    fn session_key() -> SessionKey {
        SessionKey::random(&mut CryptoRandom::new())
    }

    #[test]
    fn lock_unlock_are_idempotent() {
        let key = session_key();
        let mut password = ProtectedPassword::new(b"hunter2");
        password.lock(&key);
        let once = password.raw().to_vec();
        password.lock(&key);
        assert_eq!(password.raw(), &once[..]);
        assert_ne!(password.raw(), b"hunter2");

        password.unlock(&key);
        password.unlock(&key);
        assert_eq!(password.raw(), b"hunter2");
        assert!(!password.is_locked());
    }

    #[test]
    fn guard_relocks_on_drop() {
        let key = session_key();
        let mut password = ProtectedPassword::locked_with(b"secret", &key);
        {
            let guard = PasswordGuard::new(&mut password, &key);
            assert_eq!(&*guard, b"secret");
            assert_eq!(&*guard.to_string_lossy(), "secret");
        }
        assert!(password.is_locked());
        assert_eq!(password.plaintext(&key).as_deref().map(|p| &p[..]), Some(&b"secret"[..]));
    }

    #[test]
    fn other_session_cannot_read_or_unlock() {
        let ours = session_key();
        let theirs = session_key();
        assert_ne!(ours.id(), theirs.id());

        let mut password = ProtectedPassword::locked_with(b"hunter2", &theirs);
        assert!(!password.is_readable_with(&ours));
        assert!(password.plaintext(&ours).is_none());

        password.unlock(&ours);
        assert!(password.is_locked());
        password.lock(&ours);
        assert_eq!(password.plaintext(&theirs).as_deref().map(|p| &p[..]), Some(&b"hunter2"[..]));

        // Unlocked passwords are readable with any key.
        let open = ProtectedPassword::new(b"open");
        assert!(open.is_readable_with(&ours));
        assert_eq!(open.plaintext(&theirs).as_deref().map(|p| &p[..]), Some(&b"open"[..]));
    }

    #[test]
    fn debug_is_masked() {
        let password = ProtectedPassword::new(b"topsecret");
        assert!(!format!("{:?}", password).contains("topsecret"));

        let mut bytes = [7u8; 32];
        let key = SecretKey::new(&mut bytes);
        assert_eq!(bytes, [0u8; 32]);
        assert_eq!(key.as_bytes(), &[7u8; 32]);
        assert_eq!(format!("{:?}", key), "SecretKey(***)");
    }
}
