//! Porter stemming algorithm
//!
//! M.F. Porter, "An algorithm for suffix stripping", Program 14(3), 1980.
//! Words are expected in lower case; anything that is not pure ASCII
//! letters, or shorter than three characters, is returned unchanged.

/// Stem a single lower-case word.
pub fn stem(word: &str) -> String {
    if word.len() <= 2 || !word.bytes().all(|b| b.is_ascii_lowercase()) {
        return word.to_string();
    }
    let mut stemmer = Stemmer {
        b: word.as_bytes().to_vec(),
        k: word.len() - 1,
        j: 0,
    };
    stemmer.step1ab();
    if stemmer.k > 0 {
        stemmer.step1c();
        stemmer.step2();
        stemmer.step3();
        stemmer.step4();
        stemmer.step5();
    }
    stemmer.b.truncate(stemmer.k + 1);
    // only ASCII bytes were ever written
    String::from_utf8_lossy(&stemmer.b).into_owned()
}

/// `b[0..=k]` is the current word; `j` marks the end of the stem once a
/// suffix has matched.
struct Stemmer {
    b: Vec<u8>,
    k: usize,
    j: usize,
}

impl Stemmer {
    fn is_consonant(&self, i: usize) -> bool {
        match self.b[i] {
            b'a' | b'e' | b'i' | b'o' | b'u' => false,
            b'y' => i == 0 || !self.is_consonant(i - 1),
            _ => true,
        }
    }

    /// Number of VC sequences in `b[0..=j]`.
    fn m(&self) -> usize {
        let mut n = 0;
        let mut i = 0;
        loop {
            if i > self.j {
                return n;
            }
            if !self.is_consonant(i) {
                break;
            }
            i += 1;
        }
        i += 1;
        loop {
            loop {
                if i > self.j {
                    return n;
                }
                if self.is_consonant(i) {
                    break;
                }
                i += 1;
            }
            i += 1;
            n += 1;
            loop {
                if i > self.j {
                    return n;
                }
                if !self.is_consonant(i) {
                    break;
                }
                i += 1;
            }
            i += 1;
        }
    }

    /// `b[0..=j]` contains a vowel.
    fn vowel_in_stem(&self) -> bool {
        (0..=self.j).any(|i| !self.is_consonant(i))
    }

    /// `b[i-1..=i]` is a double consonant.
    fn double_consonant(&self, i: usize) -> bool {
        i >= 1 && self.b[i] == self.b[i - 1] && self.is_consonant(i)
    }

    /// `b[i-2..=i]` is consonant-vowel-consonant and the last is not w, x or y.
    fn cvc(&self, i: usize) -> bool {
        if i < 2 || !self.is_consonant(i) || self.is_consonant(i - 1) || !self.is_consonant(i - 2)
        {
            return false;
        }
        !matches!(self.b[i], b'w' | b'x' | b'y')
    }

    /// The word ends with `s`; sets `j` to the end of the remaining stem.
    fn ends(&mut self, s: &str) -> bool {
        let s = s.as_bytes();
        let len = s.len();
        if len > self.k + 1 {
            return false;
        }
        if &self.b[self.k + 1 - len..=self.k] != s {
            return false;
        }
        // j may wrap below zero for a full-word match; callers guard with m()
        self.j = (self.k + 1 - len).wrapping_sub(1);
        true
    }

    /// Replaces `b[j+1..=k]` with `s`.
    fn set_to(&mut self, s: &str) {
        let start = self.j.wrapping_add(1);
        self.b.truncate(start);
        self.b.extend_from_slice(s.as_bytes());
        self.k = self.b.len() - 1;
    }

    fn replace_if_measure(&mut self, s: &str) {
        if self.j != usize::MAX && self.m() > 0 {
            self.set_to(s);
        }
    }

    /// Plurals and -ed / -ing.
    fn step1ab(&mut self) {
        if self.b[self.k] == b's' {
            if self.ends("sses") {
                self.k -= 2;
            } else if self.ends("ies") {
                self.set_to("i");
            } else if self.k >= 1 && self.b[self.k - 1] != b's' {
                self.k -= 1;
            }
            self.b.truncate(self.k + 1);
        }
        if self.ends("eed") {
            if self.j != usize::MAX && self.m() > 0 {
                self.k -= 1;
                self.b.truncate(self.k + 1);
            }
        } else if (self.ends("ed") || self.ends("ing"))
            && self.j != usize::MAX
            && self.vowel_in_stem()
        {
            self.k = self.j;
            self.b.truncate(self.k + 1);
            if self.ends("at") {
                self.set_to("ate");
            } else if self.ends("bl") {
                self.set_to("ble");
            } else if self.ends("iz") {
                self.set_to("ize");
            } else if self.double_consonant(self.k) {
                if !matches!(self.b[self.k], b'l' | b's' | b'z') {
                    self.k -= 1;
                    self.b.truncate(self.k + 1);
                }
            } else {
                self.j = self.k;
                if self.m() == 1 && self.cvc(self.k) {
                    self.set_to("e");
                }
            }
        }
    }

    /// Terminal y to i when there is another vowel in the stem.
    fn step1c(&mut self) {
        if self.ends("y") && self.j != usize::MAX && self.vowel_in_stem() {
            self.b[self.k] = b'i';
        }
    }

    /// Double suffixes to single ones, e.g. -ization to -ize.
    fn step2(&mut self) {
        if self.k == 0 {
            return;
        }
        const RULES: &[(&str, &str)] = &[
            ("ational", "ate"),
            ("tional", "tion"),
            ("enci", "ence"),
            ("anci", "ance"),
            ("izer", "ize"),
            ("bli", "ble"),
            ("alli", "al"),
            ("entli", "ent"),
            ("eli", "e"),
            ("ousli", "ous"),
            ("ization", "ize"),
            ("ation", "ate"),
            ("ator", "ate"),
            ("alism", "al"),
            ("iveness", "ive"),
            ("fulness", "ful"),
            ("ousness", "ous"),
            ("aliti", "al"),
            ("iviti", "ive"),
            ("biliti", "ble"),
            ("logi", "log"),
        ];
        for (suffix, replacement) in RULES {
            if self.ends(suffix) {
                self.replace_if_measure(replacement);
                return;
            }
        }
    }

    /// -ic-, -full, -ness etc.
    fn step3(&mut self) {
        const RULES: &[(&str, &str)] = &[
            ("icate", "ic"),
            ("ative", ""),
            ("alize", "al"),
            ("iciti", "ic"),
            ("ical", "ic"),
            ("ful", ""),
            ("ness", ""),
        ];
        for (suffix, replacement) in RULES {
            if self.ends(suffix) {
                self.replace_if_measure(replacement);
                return;
            }
        }
    }

    /// Removes -ant, -ence etc. in context <c>vcvc<v>.
    fn step4(&mut self) {
        const SUFFIXES: &[&str] = &[
            "al", "ance", "ence", "er", "ic", "able", "ible", "ant", "ement", "ment", "ent",
            "ion", "ou", "ism", "ate", "iti", "ous", "ive", "ize",
        ];
        let mut matched = false;
        for suffix in SUFFIXES {
            if self.ends(suffix) {
                if *suffix == "ion" {
                    // -ion only after s or t
                    if self.j == usize::MAX || !matches!(self.b[self.j], b's' | b't') {
                        return;
                    }
                }
                matched = true;
                break;
            }
        }
        if matched && self.j != usize::MAX && self.m() > 1 {
            self.k = self.j;
            self.b.truncate(self.k + 1);
        }
    }

    /// Removes a final -e and reduces -ll when m() > 1.
    fn step5(&mut self) {
        self.j = self.k;
        if self.b[self.k] == b'e' {
            let a = self.m();
            if a > 1 || (a == 1 && !self.cvc(self.k - 1)) {
                self.k -= 1;
                self.b.truncate(self.k + 1);
                self.j = self.k;
            }
        }
        if self.b[self.k] == b'l' && self.double_consonant(self.k) {
            if self.m() > 1 {
                self.k -= 1;
                self.b.truncate(self.k + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case("caresses", "caress")]
    #[case("ponies", "poni")]
    #[case("cats", "cat")]
    #[case("feed", "feed")]
    #[case("agreed", "agre")]
    #[case("plastered", "plaster")]
    #[case("motoring", "motor")]
    #[case("sing", "sing")]
    #[case("conflated", "conflat")]
    #[case("hopping", "hop")]
    #[case("falling", "fall")]
    #[case("filing", "file")]
    #[case("happy", "happi")]
    #[case("relational", "relat")]
    #[case("conditional", "condit")]
    #[case("generalization", "gener")]
    #[case("hopefulness", "hope")]
    #[case("electrical", "electr")]
    #[case("adjustment", "adjust")]
    #[case("adoption", "adopt")]
    #[case("controlling", "control")]
    #[case("running", "run")]
    #[case("gazelle", "gazel")]
    #[case("belle", "bell")]
    #[case("braille", "braill")]
    #[case("pastille", "pastil")]
    #[case("vaudeville", "vaudevil")]
    #[case("elle", "ell")]
    fn test_porter_stem(#[case] word: &str, #[case] expected: &str) {
        assert_eq!(stem(word), expected);
    }

    #[rstest]
    fn test_short_words_never_panic() {
        let letters = b'a'..=b'z';
        for x in letters.clone() {
            for y in letters.clone() {
                for z in letters.clone() {
                    let word = String::from_utf8(vec![x, y, z]).unwrap();
                    stem(&word);
                    for w in letters.clone() {
                        let word = String::from_utf8(vec![x, y, z, w]).unwrap();
                        stem(&word);
                    }
                }
            }
        }
    }

    #[rstest]
    #[case("a")]
    #[case("is")]
    #[case("Running")]
    #[case("naïve")]
    #[case("x2")]
    fn test_unstemmable_words_unchanged(#[case] word: &str) {
        assert_eq!(stem(word), word);
    }
}
