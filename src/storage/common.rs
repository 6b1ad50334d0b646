use std::sync::atomic::{AtomicU8, Ordering};

const U8_SIZE: usize = std::mem::size_of::<u8>();
const U16_SIZE: usize = std::mem::size_of::<u16>();
const U32_SIZE: usize = std::mem::size_of::<u32>();

/// Copies `src` into block memory, one byte at a time
pub(in crate::storage) fn store_bytes(dest: &[AtomicU8], src: &[u8]) {
    for (byte, val) in dest.iter().zip(src) {
        byte.store(*val, Ordering::Relaxed);
    }
}

/// Copies block memory into `dest`, one byte at a time
pub(in crate::storage) fn load_bytes(src: &[AtomicU8], dest: &mut [u8]) {
    for (val, byte) in dest.iter_mut().zip(src) {
        *val = byte.load(Ordering::Relaxed);
    }
}

/// Writes big endian header fields into block memory
pub(in crate::storage) struct Serializer<'a> {
    buffer: &'a [AtomicU8],
    pos: usize,
}

impl<'a> Serializer<'a> {
    pub fn new(buffer: &'a [AtomicU8]) -> Self {
        Self { buffer, pos: 0 }
    }

    pub fn at(buffer: &'a [AtomicU8], pos: usize) -> Self {
        Self { buffer, pos }
    }

    pub fn serialize_u8(&mut self, val: u8) {
        self.copy_bytes(&val.to_be_bytes());
    }

    pub fn serialize_u16(&mut self, val: u16) {
        self.copy_bytes(&val.to_be_bytes());
    }

    pub fn serialize_u32(&mut self, val: u32) {
        self.copy_bytes(&val.to_be_bytes());
    }

    pub fn copy_bytes(&mut self, bytes: &[u8]) {
        store_bytes(&self.buffer[self.pos..self.pos + bytes.len()], bytes);
        self.pos += bytes.len();
    }

    pub fn end(self) -> usize {
        self.pos
    }
}

/// Reads big endian header fields from block memory
pub(in crate::storage) struct Deserializer<'a> {
    buffer: &'a [AtomicU8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn at(buffer: &'a [AtomicU8], pos: usize) -> Self {
        Self { buffer, pos }
    }

    pub fn deserialize_u8(&mut self) -> u8 {
        let mut bytes = [0u8; U8_SIZE];
        self.copy_bytes(&mut bytes);
        u8::from_be_bytes(bytes)
    }

    pub fn deserialize_u16(&mut self) -> u16 {
        let mut bytes = [0u8; U16_SIZE];
        self.copy_bytes(&mut bytes);
        u16::from_be_bytes(bytes)
    }

    pub fn deserialize_u32(&mut self) -> u32 {
        let mut bytes = [0u8; U32_SIZE];
        self.copy_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    pub fn copy_bytes(&mut self, dest: &mut [u8]) {
        load_bytes(&self.buffer[self.pos..self.pos + dest.len()], dest);
        self.pos += dest.len();
    }
}
