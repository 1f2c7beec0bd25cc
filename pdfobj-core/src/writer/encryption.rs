//! Hook points for document encryption
//!
//! The cipher itself lives outside this crate. The writer only tells the
//! hook which object is being written and hands it the bytes of every string
//! and stream body to encrypt in place.

/// Encryption collaborator used by an encrypted output session
pub trait EncryptionHook {
    /// Called before an object is written with its object number and
    /// generation, which key the per-object cipher.
    fn set_label(&mut self, label: u32, generation: u16);

    /// Encrypt `data` in place. The length may change.
    fn encrypt(&mut self, data: &mut Vec<u8>);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// XORs every byte with the low byte of the current label.
    #[derive(Debug, Default)]
    pub(crate) struct XorHook {
        pub(crate) key: u8,
        pub(crate) labels: Vec<(u32, u16)>,
    }

    impl EncryptionHook for XorHook {
        fn set_label(&mut self, label: u32, generation: u16) {
            self.key = label as u8;
            self.labels.push((label, generation));
        }

        fn encrypt(&mut self, data: &mut Vec<u8>) {
            for byte in data.iter_mut() {
                *byte ^= self.key;
            }
        }
    }

    #[test]
    fn test_xor_hook_is_keyed_by_label() {
        let mut hook = XorHook::default();
        hook.set_label(3, 0);
        let mut data = vec![0, 1, 2];
        hook.encrypt(&mut data);
        assert_eq!(data, vec![3, 2, 1]);
        assert_eq!(hook.labels, vec![(3, 0)]);
    }
}
