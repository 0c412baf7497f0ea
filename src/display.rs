// Small helpers for putting keys and offsets into log lines.

pub fn hex(bytes: &[u8]) -> String {
	hex::encode(bytes)
}
