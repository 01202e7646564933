//! Decryption stream over a parent ciphertext stream
//!
//! Block modes are served with true random access: the unit containing the
//! requested offset is located by arithmetic, the one or two ciphertext
//! units involved are read from the parent, and only those are decrypted.
//! Keystream modes (OFB, RC4) XOR a regenerated keystream over the raw
//! bytes, replaying from the key on backward movement.

use std::io::SeekFrom;

use crate::crypto::Decrypter;
use crate::error::{VfsError, VfsResult};
use crate::stream::{read_exact_at, resolve_seek, FileObject};

pub struct EncryptedStream {
    parent: Box<dyn FileObject>,
    decrypter: Decrypter,
    size: u64,
    offset: u64,
}

impl EncryptedStream {
    pub fn new(mut parent: Box<dyn FileObject>, decrypter: Decrypter) -> VfsResult<Self> {
        let size = parent.size()?;
        Ok(Self {
            parent,
            decrypter,
            size,
            offset: 0,
        })
    }

    fn read_keystream_mode(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        self.parent.seek(SeekFrom::Start(self.offset))?;
        let count = self.parent.read(buf)?;
        self.decrypter
            .apply_keystream(self.offset, &mut buf[..count])?;
        self.offset += count as u64;
        Ok(count)
    }

    fn read_block_mode(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let unit = self.decrypter.unit_size() as u64;

        // A trailing partial unit can never decrypt: reads are clipped to
        // the complete units and only fail once the offset is inside the
        // undecryptable tail.
        let decryptable = self.size / unit * unit;
        if self.offset >= decryptable {
            return Err(VfsError::InvalidData(format!(
                "ciphertext size {} is not a multiple of the {}-byte unit",
                self.size, unit
            )));
        }
        let want = buf.len().min((decryptable - self.offset) as usize) as u64;
        if want == 0 {
            return Ok(0);
        }

        let first_unit = self.offset / unit;
        let aligned_start = first_unit * unit;
        let aligned_end = (self.offset + want).div_ceil(unit) * unit;

        let mut ciphertext = vec![0u8; (aligned_end - aligned_start) as usize];
        read_exact_at(self.parent.as_mut(), aligned_start, &mut ciphertext)?;

        let prev_unit = if first_unit > 0 && self.decrypter.needs_previous_unit() {
            let mut prev = vec![0u8; unit as usize];
            read_exact_at(self.parent.as_mut(), aligned_start - unit, &mut prev)?;
            Some(prev)
        } else {
            None
        };

        self.decrypter
            .decrypt_units(first_unit, prev_unit.as_deref(), &mut ciphertext)?;

        let skip = (self.offset - aligned_start) as usize;
        let take = want as usize;
        buf[..take].copy_from_slice(&ciphertext[skip..skip + take]);
        self.offset += take as u64;
        Ok(take)
    }
}

impl FileObject for EncryptedStream {
    fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        if self.offset >= self.size || buf.is_empty() {
            return Ok(0);
        }
        if self.decrypter.is_keystream() {
            let want = buf.len().min((self.size - self.offset) as usize);
            let (clipped, _) = buf.split_at_mut(want);
            self.read_keystream_mode(clipped)
        } else {
            self.read_block_mode(buf)
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let size = self.size;
        self.offset = resolve_seek(pos, self.offset, || Ok(size))?;
        Ok(self.offset)
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn size(&mut self) -> VfsResult<u64> {
        Ok(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_spec::{CipherMode, EncryptionMethod};
    use crate::stream::fake::FakeStream;
    use aes::Aes128;
    use cipher::generic_array::GenericArray;
    use cipher::{BlockEncrypt, KeyInit};

    const KEY: [u8; 16] = [0x13; 16];
    const IV: [u8; 16] = [0x37; 16];

    fn cbc_ciphertext(plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes128::new_from_slice(&KEY).unwrap();
        let mut out = Vec::new();
        let mut chain = IV.to_vec();
        for block in plaintext.chunks(16) {
            let mut work: Vec<u8> =
                block.iter().zip(chain.iter()).map(|(p, c)| p ^ c).collect();
            cipher.encrypt_block(GenericArray::from_mut_slice(&mut work));
            chain = work.clone();
            out.extend_from_slice(&work);
        }
        out
    }

    fn cbc_stream(ciphertext: Vec<u8>) -> EncryptedStream {
        let decrypter = Decrypter::new(
            EncryptionMethod::Aes,
            Some(CipherMode::Cbc),
            &KEY,
            Some(&IV),
        )
        .unwrap();
        EncryptedStream::new(Box::new(FakeStream::new(ciphertext)), decrypter).unwrap()
    }

    #[test]
    fn test_cbc_full_read() {
        let plaintext = vec![0x61u8; 64];
        let mut stream = cbc_stream(cbc_ciphertext(&plaintext));
        assert_eq!(stream.size().unwrap(), 64);

        let mut buf = vec![0u8; 64];
        assert_eq!(stream.read(&mut buf).unwrap(), 64);
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn test_cbc_unaligned_interior_read() {
        let plaintext: Vec<u8> = (0u8..128).collect();
        let mut stream = cbc_stream(cbc_ciphertext(&plaintext));

        stream.seek(SeekFrom::Start(37)).unwrap();
        let mut buf = [0u8; 21];
        assert_eq!(stream.read(&mut buf).unwrap(), 21);
        assert_eq!(&buf[..], &plaintext[37..58]);
    }

    #[test]
    fn test_rc4_stream() {
        // Ciphertext of RC4("Key", "Plaintext").
        let ciphertext = vec![0xBB, 0xF3, 0x16, 0xE8, 0xD9, 0x40, 0xAF, 0x0A, 0xD3];
        let decrypter = Decrypter::new(EncryptionMethod::Rc4, None, b"Key", None).unwrap();
        let mut stream =
            EncryptedStream::new(Box::new(FakeStream::new(ciphertext)), decrypter).unwrap();

        let mut buf = [0u8; 9];
        assert_eq!(stream.read(&mut buf).unwrap(), 9);
        assert_eq!(&buf, b"Plaintext");

        // Backward seek replays the keystream window.
        stream.seek(SeekFrom::Start(5)).unwrap();
        let mut tail = [0u8; 4];
        assert_eq!(stream.read(&mut tail).unwrap(), 4);
        assert_eq!(&tail, b"text");
    }

    #[test]
    fn test_partial_final_block_rejected() {
        let mut ciphertext = cbc_ciphertext(&[0u8; 32]);
        ciphertext.truncate(40);
        let mut stream = cbc_stream(ciphertext);

        stream.seek(SeekFrom::Start(32)).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            stream.read(&mut buf),
            Err(VfsError::InvalidData(_))
        ));
    }
}
