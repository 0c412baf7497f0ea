use std::path::PathBuf;

pub struct TempDir(pub PathBuf);

impl TempDir {
	pub fn new(name: &'static str) -> TempDir {
		env_logger::try_init().ok();
		let mut path = std::env::temp_dir();
		path.push("slotdb-test");
		path.push(name);
		if path.exists() {
			std::fs::remove_dir_all(&path).unwrap();
		}
		std::fs::create_dir_all(&path).unwrap();
		TempDir(path)
	}

	pub fn file(&self, name: &str) -> PathBuf {
		self.0.join(name)
	}
}

impl Drop for TempDir {
	fn drop(&mut self) {
		if self.0.exists() {
			std::fs::remove_dir_all(&self.0).unwrap();
		}
	}
}
