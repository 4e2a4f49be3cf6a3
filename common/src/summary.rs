/// Counters describing what a single transfer put on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_sent: u64,
    pub files_sent: usize,
    pub directories_sent: usize,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes sent: {}\n\
            files sent: {}\n\
            directories sent: {}",
            bytesize::ByteSize(self.bytes_sent),
            self.files_sent,
            self.directories_sent,
        )
    }
}
