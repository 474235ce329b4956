use subtle::ConstantTimeEq as _;
use zeroize::Zeroize as _;

/// Compares two byte slices without short-circuiting on the first mismatch.
/// Slices of different lengths are unequal and return immediately.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Tries to keep the pages holding `data` out of swap. Failure is expected on
/// some systems (e.g. a low RLIMIT_MEMLOCK) and is not an error.
pub fn lock_memory(data: &[u8]) -> bool {
    platform::try_mlock(data.as_ptr(), data.len())
}

/// Releases a lock taken with `lock_memory`.
pub fn unlock_memory(data: &[u8]) {
    platform::try_munlock(data.as_ptr(), data.len())
}

/// Zeroes `data` in a way the optimizer cannot remove.
pub fn secure_erase(data: &mut [u8]) {
    data.zeroize();
}

/// XOR dst with src (overwrites the values in dst).
/// If dst is not the same size as src, the larger slice
/// will be truncated.
pub fn xor_slices(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= *s;
    }
}

/// XORs `buffer` with `key` repeated cyclically. Applying it twice restores
/// the original bytes. An empty key leaves the buffer untouched.
pub fn xor_toggle(buffer: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for chunk in buffer.chunks_mut(key.len()) {
        xor_slices(chunk, key);
    }
}

#[cfg(unix)]
mod platform {
    pub(super) fn try_mlock(ptr: *const u8, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        // SAFETY: mlock only inspects the address range; an invalid range is
        // reported through the return value.
        unsafe { libc::mlock(ptr as *const libc::c_void, len) == 0 }
    }

    pub(super) fn try_munlock(ptr: *const u8, len: usize) {
        if len == 0 {
            return;
        }
        // SAFETY: see try_mlock. Failure is ignored.
        unsafe {
            libc::munlock(ptr as *const libc::c_void, len);
        }
    }
}

#[cfg(not(unix))]
mod platform {
    pub(super) fn try_mlock(_ptr: *const u8, _len: usize) -> bool {
        false
    }

    pub(super) fn try_munlock(_ptr: *const u8, _len: usize) {}
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn constant_time_eq_lengths() {
        assert!(constant_time_eq(&[], &[]));
        assert!(constant_time_eq(&[7], &[7]));
        assert!(!constant_time_eq(&[7], &[8]));

        let a = vec![0x5Au8; 1000];
        let mut b = a.clone();
        assert!(constant_time_eq(&a, &b));
        b[999] ^= 1;
        assert!(!constant_time_eq(&a, &b));
        b[999] ^= 1;
        b[0] ^= 0x80;
        assert!(!constant_time_eq(&a, &b));

        assert!(!constant_time_eq(&a, &a[..999]));
        assert!(!constant_time_eq(&[], &[0]));
    }

    #[test]
    fn xor_toggle_is_self_inverse() {
        let original: Vec<u8> = (0..100u8).collect();
        let key = [0x13u8, 0x37, 0xC0, 0xDE, 0x01, 0xFF, 0x42];
        let mut data = original.clone();
        xor_toggle(&mut data, &key);
        assert_ne!(data, original);
        assert_eq!(data[7], original[7] ^ 0x13);
        xor_toggle(&mut data, &key);
        assert_eq!(data, original);
    }

    #[test]
    fn xor_toggle_with_empty_key() {
        let mut data = [1u8, 2, 3];
        xor_toggle(&mut data, &[]);
        assert_eq!(data, [1, 2, 3]);
    }

    #[test]
    fn secure_erase_zeroes() {
        let mut data = [0xFFu8; 64];
        secure_erase(&mut data);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn lock_is_best_effort() {
        let data = vec![1u8; 4096];
        let _ = lock_memory(&data);
        unlock_memory(&data);
        assert!(lock_memory(&[]));
    }
}
