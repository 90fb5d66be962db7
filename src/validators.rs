pub struct Validator<'a, T: ?Sized>(&'a [(&'static str, &'a (dyn Fn(&T) -> bool + Sync))]);

impl<'a, T: ?Sized> Validator<'a, T> {
    pub fn run<U: AsRef<T>>(&self, value: U) -> Result<(), &'static str> {
        let Validator(sub_validators) = *self;
        for (message, validator) in sub_validators {
            if !validator(value.as_ref()) {
                return Err(message);
            }
        }
        Ok(())
    }
}

macro_rules! min {
    ($n: expr) => {
        |s| s.len() >= $n
    };
}

macro_rules! max {
    ($n: expr) => {
        |s| s.len() <= $n
    };
}

macro_rules! is_match {
    ($pattern: expr) => {
        |s| regex!($pattern).is_match(&*s)
    };
}

pub static USERNAME: Validator<str> = Validator(&[
    ("Username length shall not be less than 2.", &min!(2)),
    ("Username length shall not be more than 32.", &max!(32)),
    (
        r#"Username can only contain letters, "_" and numbers."#,
        &is_match!(r#"^[\w_\d]+$"#),
    ),
]);

pub static DISPLAY_NAME: Validator<str> = Validator(&[
    ("Display name shall not be empty.", &min!(1)),
    ("Display name shall not be more than 32.", &max!(32)),
]);

pub static BIO: Validator<str> = Validator(&[("Bio shall not be more than 2048.", &max!(2048))]);

pub static STATUS_TEXT: Validator<str> =
    Validator(&[("Status text shall not be more than 256.", &max!(256))]);

pub static CUSTOM_COLOR: Validator<str> = Validator(&[
    ("Color shall not be more than 32.", &max!(32)),
    (
        "Color shall be a CSS color keyword or hex value.",
        &is_match!(r"^(#[0-9a-fA-F]{3,8}|[a-zA-Z]+)$"),
    ),
]);

#[test]
fn validator_test() {
    assert_eq!(USERNAME.run("whoa"), Ok(()));
    assert!(USERNAME.run("whoa whoa").is_err());
    assert!(USERNAME.run("").is_err());

    assert_eq!(DISPLAY_NAME.run("whoa"), Ok(()));
    assert!(DISPLAY_NAME.run("").is_err());

    assert!(BIO.run("hello").is_ok());

    assert!(CUSTOM_COLOR.run("#ff00aa").is_ok());
    assert!(CUSTOM_COLOR.run("tomato").is_ok());
    assert!(CUSTOM_COLOR.run("not a color").is_err());
}
