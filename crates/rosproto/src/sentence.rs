//! Request sentence builder.

/// A command sentence under construction.
///
/// ```
/// use rosproto::Sentence;
///
/// let s = Sentence::command("/ppp/active/print")
///     .proplist(&["name", "address"])
///     .query("name", "budi@lan");
/// assert_eq!(s.words()[0], "/ppp/active/print");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    words: Vec<String>,
}

impl Sentence {
    /// Start a sentence with a command path word.
    pub fn command(path: &str) -> Self {
        Self {
            words: vec![path.to_string()],
        }
    }

    /// Add an attribute word `=key=value`.
    pub fn attribute(mut self, key: &str, value: &str) -> Self {
        self.words.push(format!("={key}={value}"));
        self
    }

    /// Add a query word `?key=value`.
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.words.push(format!("?{key}={value}"));
        self
    }

    /// Add a property list `=.proplist=a,b,c`.
    pub fn proplist(self, keys: &[&str]) -> Self {
        let joined = keys.join(",");
        self.attribute(".proplist", &joined)
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn into_words(self) -> Vec<String> {
        self.words
    }

    /// The command path (first word).
    pub fn path(&self) -> &str {
        &self.words[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_attribute_and_query_words() {
        let s = Sentence::command("/ip/firewall/nat/set")
            .attribute(".id", "*7")
            .attribute("to-addresses", "10.0.0.20")
            .attribute("to-ports", "9090");
        assert_eq!(
            s.words(),
            &[
                "/ip/firewall/nat/set",
                "=.id=*7",
                "=to-addresses=10.0.0.20",
                "=to-ports=9090",
            ]
        );
    }

    #[test]
    fn proplist_joins_keys() {
        let s = Sentence::command("/ppp/secret/print").proplist(&["name", "profile"]);
        assert_eq!(s.words()[1], "=.proplist=name,profile");
    }

    #[test]
    fn value_may_contain_equals() {
        let s = Sentence::command("/login").attribute("password", "a=b=c");
        assert_eq!(s.words()[1], "=password=a=b=c");
    }
}
