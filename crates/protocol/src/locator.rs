//! Page addressing inside the host.

use serde::{Deserialize, Serialize};

/// Identifies where inside the host a session lives.
///
/// On the wire the host page id is called `tabId`. The frame id is optional: a locator without
/// one addresses whichever frame of the page registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLocator {
	#[serde(rename = "tabId")]
	pub host_id: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub frame_id: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub url: Option<String>,
}

impl PageLocator {
	pub fn new(host_id: i64) -> Self {
		Self {
			host_id,
			frame_id: None,
			url: None,
		}
	}

	pub fn with_frame(mut self, frame_id: i64) -> Self {
		self.frame_id = Some(frame_id);
		self
	}

	pub fn with_url(mut self, url: impl Into<String>) -> Self {
		self.url = Some(url.into());
		self
	}

	/// Returns true if both locators address the same page.
	///
	/// Host ids must be equal. Frame ids are only compared when both sides carry one, and the URL
	/// never participates. This is deliberately looser than `==`, which is structural.
	pub fn matches(&self, other: &PageLocator) -> bool {
		if self.host_id != other.host_id {
			return false;
		}
		match (self.frame_id, other.frame_id) {
			(Some(a), Some(b)) => a == b,
			_ => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn matches_ignores_missing_frame() {
		let registered = PageLocator::new(7).with_frame(0).with_url("https://chatgpt.com/");
		assert!(PageLocator::new(7).matches(&registered));
		assert!(registered.matches(&PageLocator::new(7)));
	}

	#[test]
	fn matches_compares_frames_when_both_present() {
		let a = PageLocator::new(7).with_frame(1);
		assert!(a.matches(&PageLocator::new(7).with_frame(1)));
		assert!(!a.matches(&PageLocator::new(7).with_frame(2)));
		assert!(!a.matches(&PageLocator::new(8).with_frame(1)));
	}

	#[test]
	fn url_does_not_participate() {
		let a = PageLocator::new(3).with_url("https://grok.com/");
		let b = PageLocator::new(3).with_url("https://grok.com/chat/abc");
		assert!(a.matches(&b));
		assert_ne!(a, b);
	}

	#[test]
	fn wire_shape_uses_tab_id() {
		let json = serde_json::to_value(PageLocator::new(999).with_frame(0)).unwrap();
		assert_eq!(json, serde_json::json!({"tabId": 999, "frameId": 0}));

		let parsed: PageLocator = serde_json::from_str(r#"{"tabId": 12}"#).unwrap();
		assert_eq!(parsed, PageLocator::new(12));
	}
}
