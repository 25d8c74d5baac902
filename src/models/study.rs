//! Derived indicator ("study") definitions attached to chart sessions.
//!
//! Built-in studies are looked up by name with [`Study::builtin`]; callers
//! can also assemble their own with [`Study::new`].

use serde_json::{Value, json};

/// Script loader every built-in study is created with.
pub const SCRIPT_ID: &str = "Script@tv-scripting-101!";

/// Names accepted by [`Study::builtin`].
pub const BUILTIN_STUDIES: [&str; 6] = ["ema10", "ema21", "ema50", "ema100", "ema200", "bbands20"];

const PINE_VERSION: &str = "29.0";

const EMA10_SCRIPT: &str = "bmI9Ks46_u96awLDSJj8c4xVHubmEMw==_E3G6GqoJr5rLISOgO9nBsoc2e4nLvKBi1q5InR7AttexejdPJoAOC8z/vvUAqlCMpPiv11uwGy2v0EG7phDcDFZiaEKMt/1ooB+5hPaSKK7EuUzKTIGLFzbLtwjwO5Z7jR11jP1Z2MsAt9cN0smrwQMTjphpEDRVvzDqBcB2wZRR7BxQeQ9j7ynKMseInC5G34ToyLmrle0+4Dcw9IhWNkvpGLKhODeEIdjlfm6ZzEAu3cuuLIx9Kn1f1h6AdSVccLpVDzTy67dQ9TanhaaIy5Ogz+kuRYKTkkP63IaXvEn03t29DDUoWMxzQolZuBW6vDVAbHMgPm52yHN88uvJ5px4IGDbuRdJlTLrMpbgG4SAP+DWhKL6wbsu9MfYfe4bGMzfvF7vE/ltqlycHIHIjOS2SfFrqxmVg4eH1+V+/7g0JbnCvSJAeY/RKUCx+jJZa+Gm0mvhmvz+abYWJLpqTpBctZ8kYI+6EGVXgshUZrkahn+S0oGnvwOB4NzLMCSX9NLidpDZKuDuI2Whfb08toOkoGiF8JYhvnotLZSDa0DTDhwZtqQf0hAChG/3RK42S75LxcZwyTl39emlxdU9uDoDV+d/NHZFao+FSoNhSkTsqOnfuVp5l3V1yop8Psh64sbs2A1cGqu1";

const EMA21_SCRIPT: &str = "bmI9Ks46_iAX8exg0i/mBcDvY1smolQ==_jO5cug1NHY+z8s0TpdR7Fev6EEMhjfmTU5mbl5iuXE4UOVqejOvpDjiTL5t3fgGOAjkPxvD/uGIuqepaXnEzXZf3Dfcivitq36RSeVQJZkcjMjW9VjSBs2JBC46Z2XEHj1oKNZSZOQlx1NXqJiPhl4wEzpiWIDdgSG2mxoZXjp+4Bq9+C9cMfH0E9t8pFWkvKeckFaN5P8ZtdAR8k/UBSaMd0r68pvEpiLdujfRKb2xjbIQMsnJzqq0/BRMx0rFzK1OHtZLyqaxdHDjIsmwVmyd2OwzJg498v08fSIrlK5VNnlrxk/RUc+ZVrWVY/eH4XmqMuzaNha3HtFUO3wjQip8ISjaWgv+WwGPAnMgVVWSSJrZ9Urtj6+NIbwCRctEaMLKzHI01uk8+JXlzs5pqjzmAyaXvgMkKVvhp5+NjRxKHyHfCD9Gd+UNN8QoAPnRVied3ETVygHjvK6eoD9Wb5TvS9U4sWoShZ8QBX28FinVjbNDYxq/RUTrcevujlasFaD7Y4gbGqakbVBjJx+xNVzbzA4usJMEeCOd9ahtX2HtJdajXxFZkZPImRk+kMtuNSElCq2E10PSn6jFEcHYnOkwF43wDilGsMHWJDI9gXr4nCUqfWBBn8XPrOJVdWyZ7GIxOl9ZOn1ix";

/// Shared by the 50, 100 and 200 period averages.
const EMA_LONG_SCRIPT: &str = "bmI9Ks46_YgiQhsSwDdbNYHsEzTaxnA==_tysyiC9xdsEwtdmdMBSVgXuVvcZQ9j6XhIppaillwsxzP5xbNHizoC2fq0d6Q6EZeh3JWFos4nGmxiOETJ4ncnF0L/i6laHxlvePKlj2JEbxW5NGFl5l2KgufioukfuvBYZK/wIWE/3hLrlxXITNc1MWs10LKta7PyhbyJ2gW6G8S+VU0P4L4JBVQurjsKg7vFM9IiSGgZ1MYb655UzYrm9q4VuIlFVj3wQsYj+xf2lK947wZETX1p8T3moRqYmpZ32GT6V5Krk2pVttLcUIAu1pzUOC6cw1f7PNI7dmOskToyk4TpxiVnqbZRRmj2N+vPdb/nXCSQOLH3fX3McEz6uguxb0MBQgnbCMrdV6bDtVB5xiCfYjA0uoxqCH7kKdzhQbRWVO8J6M+NZkxvPI7A4EJtgYFiRKEOjYO74BeW0UIj904Ms9NAYN6MnU28GjQ895q7AmIkyP/RO9z2yNU5Obnt4VZhJoLsWU+sfMFK0VdoPAoPK52EjeUq7gW3Bfd9ig2/V5dlcNPn55R5HY8Hs5lq6iTpH2rM2wr2s7q4VEfbLQZw7mHNm01btpH7MSuuxgHBJc7DcN9uxRYViDQw666TMjWXflJFzB3WA/NotrRbAH9KWTMISrtc9XunRjd+plBbUOyNPR";

const BBANDS_SCRIPT: &str = "bmI9Ks46_oD+tpF2k+3I4ptfWVB5zAg==_SzZQ0i7zeu6zfw05iX1nk5+LTl+Ozp0UXh/XSlybKgscP8ebiBDx4Bfzfvudeaf7wjFo37+jrCTv08wHOexvDkKu+j2V37Wc13uTglDYIkVkKMdhzpG0h8uUnnRkksgkJNScvfM/FUxTdaQAYuQ+4CrejfduQndMYc+Uvf+0MzX7lHGMHmprn4YuSi4cSrKoyOD0lJkMMT85eaCXHWooNyUNzfBqXufrBwx5CZZdJgY8FvNn+zB4meN3snRLjkehFp7K+R1g53fN5x5LinZCqFAw91QEGa2/+p/nYQ61rdyMVgnJjRox4esZFaHaoqxFB45J5EtomRXrtENkHnMrppomgrTRKQkvA0nzD7ft1+gkac5zWR6dxxgyxWieJ/Kgol18+kOEr4ZfA1Cia8OrQ5aPJ3MHxrIjl8f//eNc60tvNKQcfqT8KbgU23hUOBSaYGBYz/rlaJKlMmGPVtMqsyFpYKKVNm+jG+prrU5Nj3+r8NOY9o6vtqlC4m1MeF2bafyr/tnhz04MK5zbQtzJxzuOoxftOQUker7CLlTTDrBU9VqC9tAmFhiC71sLD1tCPllTaZ2t4GqYEGf4xHiImRK2q1dv9QijF4JkP19q1/8EoR0lRF/Sfdm6PMPrPTY8QTeCq0DL649avSHXQg4JWsPwX/66wGbiAoiaXJ+uhsuj7Y8W15XWS2nK+k4Ya8ZwM1Qm+MIfrQH00kwi";

/// A derived indicator series requested alongside the primary bars.
#[derive(Debug, Clone, PartialEq)]
pub struct Study {
    /// Short name; also the column prefix in result tables.
    pub name: String,
    pub script_id: String,
    /// Script text and inputs sent as the last `create_study` parameter.
    pub settings: Value,
    /// Names of the output plots, when the study produces more than one.
    pub outputs: Vec<String>,
}

impl Study {
    pub fn new(name: impl Into<String>, script_id: impl Into<String>, settings: Value) -> Self {
        Self {
            name: name.into(),
            script_id: script_id.into(),
            settings,
            outputs: Vec::new(),
        }
    }

    /// Names the output plots, in wire order.
    #[must_use]
    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    /// Looks up one of the [`BUILTIN_STUDIES`].
    pub fn builtin(name: &str) -> Option<Self> {
        let study = match name {
            "ema10" => ema(name, 10, EMA10_SCRIPT),
            "ema21" => ema(name, 21, EMA21_SCRIPT),
            "ema50" => ema(name, 50, EMA_LONG_SCRIPT),
            "ema100" => ema(name, 100, EMA_LONG_SCRIPT),
            "ema200" => ema(name, 200, EMA_LONG_SCRIPT),
            "bbands20" => bollinger_bands(name, 20, 2.0, BBANDS_SCRIPT),
            _ => return None,
        };
        Some(study)
    }

    /// Id of the series this study is attached as, e.g. `s_ema10`.
    pub fn series_id(&self) -> String {
        format!("s_{}", self.name)
    }

    /// Column names for a point carrying `width` values after the timestamp.
    ///
    /// Declared outputs win; otherwise a single value is named after the
    /// study and several values are numbered from 1.
    pub fn column_names(&self, width: usize) -> Vec<String> {
        if !self.outputs.is_empty() {
            return self
                .outputs
                .iter()
                .map(|output| format!("{}_{output}", self.name))
                .collect();
        }

        match width {
            1 => vec![self.name.clone()],
            _ => (1..=width).map(|i| format!("{}_{i}", self.name)).collect(),
        }
    }
}

fn input(value: Value, kind: &str) -> Value {
    json!({"v": value, "f": true, "t": kind})
}

fn ema(name: &str, length: u32, text: &str) -> Study {
    let settings = json!({
        "text": text,
        "pineId": "STD;EMA",
        "pineVersion": PINE_VERSION,
        "pineFeatures": input(json!("{'indicator':1,'plot':1,'ta':1}"), "text"),
        "in_0": input(json!(length), "integer"),
        "in_1": input(json!("close"), "source"),
        "in_2": input(json!(0), "integer"),
        "in_3": input(json!("EMA"), "text"),
        "in_4": input(json!(5), "integer"),
        "in_5": input(json!(""), "resolution"),
        "in_6": input(json!(true), "bool"),
    });
    Study::new(name, SCRIPT_ID, settings)
}

fn bollinger_bands(name: &str, length: u32, deviations: f64, text: &str) -> Study {
    let settings = json!({
        "text": text,
        "pineId": "STD;Bollinger_Bands",
        "pineVersion": PINE_VERSION,
        "pineFeatures": input(json!(r#"{"indicator":1,"plot":1,"ta":1}"#), "text"),
        "in_0": input(json!(length), "integer"),
        "in_1": input(json!("SMA"), "text"),
        "in_2": input(json!("close"), "source"),
        "in_3": input(json!(deviations), "float"),
        "in_4": input(json!(0), "integer"),
        "in_5": input(json!(""), "resolution"),
        "in_6": input(json!(true), "bool"),
    });
    Study::new(name, SCRIPT_ID, settings).with_outputs(["middle", "upper", "lower"])
}
