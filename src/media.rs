use rand::seq::SliceRandom;

const POSITIVE: &[&str] = &[
    "https://media1.tenor.com/images/5a5b26e19c0df8b4d602103c454dba80/tenor.gif?itemid=5177277",
    "https://media.giphy.com/media/Sk3KytuxDQJQ4/giphy.gif",
    "https://media1.tenor.com/images/9b42522f041a7bb7e2c75a8f2e79ba90/tenor.gif?itemid=5762334",
    "https://media1.tenor.com/images/774acad780cbd690b5291e942866269c/tenor.gif?itemid=5122518",
    "https://media1.tenor.com/images/6ef46d3ace15910c3814796d489160fb/tenor.gif?itemid=14611487",
    "https://media1.tenor.com/images/7c02ebe55ca7a950f816d2609f37086f/tenor.gif?itemid=11928987",
    "https://media1.tenor.com/images/ab284fe03692507c6943d80ccc109dd9/tenor.gif?itemid=5102354",
    "https://media1.tenor.com/images/b23a908ae01021bc1064937bad061b11/tenor.gif?itemid=7953536",
    "https://media1.tenor.com/images/c815396f481f2e27a36f48149cfe27c4/tenor.gif?itemid=10889686",
    "https://media1.tenor.com/images/6bde0a3fb2796a908e85e8704c910f23/tenor.gif?itemid=12275806",
    "https://media1.tenor.com/images/99f79b368759c8117f3599b9ef0b8a10/tenor.gif?itemid=9581464",
    "https://media1.tenor.com/images/3afba750e7f7acbaecde5c43ac192127/tenor.gif?itemid=13756050",
    "https://media1.tenor.com/images/c17b2cdb406f209c9b78ae1b8d0097b2/tenor.gif?itemid=13335250",
];

const NEGATIVE: &[&str] = &[
    "https://media1.tenor.com/images/a34763736bfa3469bfba1abe4c082071/tenor.gif?itemid=9390989",
    "https://media1.tenor.com/images/7497db91e124928aaddca8a209ac9f3e/tenor.gif?itemid=5168755",
    "https://media1.tenor.com/images/7fbd19af37f516713d86e33b16997dd9/tenor.gif?itemid=4895737",
    "https://media1.tenor.com/images/c289b6327705e42674e3981a0972bc52/tenor.gif?itemid=4732213",
    "https://media1.tenor.com/images/4f6d3bba0006171ef081a8a6d3a372a0/tenor.gif?itemid=9178158",
    "https://media1.tenor.com/images/02259d16d192ffb8950cef62e1ed048d/tenor.gif?itemid=5079872",
    "https://media1.tenor.com/images/7fd5c29195518f21fa2164971bb4af8d/tenor.gif?itemid=13335249",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mood {
    Positive,
    Negative,
}

impl Mood {
    fn pool(self) -> &'static [&'static str] {
        match self {
            Mood::Positive => POSITIVE,
            Mood::Negative => NEGATIVE,
        }
    }

    /// Picks a random animation URL for this mood.
    pub fn pick(self) -> &'static str {
        self.pool()
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or_default()
    }

    pub fn owns(self, url: &str) -> bool {
        self.pool().contains(&url)
    }
}
