use std::collections::HashMap;
use std::sync::Arc;

/// Request headers as handed over by the hosting server, extracted once per
/// request. Names keep the case they were received with; when a name repeats,
/// the first value wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: HashMap<String, String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Case-insensitive lookup, as HTTP header names are.
    pub fn find(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in iter {
            headers.entry(name.into()).or_insert_with(|| value.into());
        }
        Self { headers }
    }
}

/// One decoded JSON document: its canonical serialization plus the headers of
/// the request it arrived in. Events from the same request share one
/// `HeaderSet`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    body: Vec<u8>,
    headers: Arc<HeaderSet>,
}

impl Event {
    pub fn new(body: Vec<u8>, headers: Arc<HeaderSet>) -> Self {
        Self { body, headers }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }
}
