/// Execution classes for guarded work, used for tracing classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskClass {
	/// Work whose result a caller is waiting on.
	Interactive,
	/// Work that can lag behind the network without blocking anyone.
	#[default]
	Background,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Background => "background",
		}
	}
}
