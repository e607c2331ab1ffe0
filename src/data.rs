// Static per-source code tables.
//
// mobile.de addresses makes by numeric id in its search URLs
// (`ms=MAKE;;MODEL`, e.g. `ms=3500;;21` for a BMW 3 Series). The table
// covers the makes the pipeline is used for; lookups are
// case-insensitive and a miss simply leaves the make filter off.

pub const MOBILE_DE_MAKES: &[(&str, u32)] = &[
    ("AUDI", 1900),
    ("BMW", 3500),
    ("CITROEN", 5900),
    ("FIAT", 8800),
    ("FORD", 9000),
    ("MERCEDES-BENZ", 17200),
    ("OPEL", 19000),
    ("PEUGEOT", 19800),
    ("PORSCHE", 20000),
    ("RENAULT", 20700),
    ("SEAT", 22500),
    ("SKODA", 22900),
    ("TOYOTA", 24100),
    ("VOLKSWAGEN", 25200),
    ("VOLVO", 25100),
];

pub fn mobile_de_make_code(make: &str) -> Option<u32> {
    let wanted = make.trim().to_ascii_uppercase();
    MOBILE_DE_MAKES
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, code)| *code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(mobile_de_make_code("bmw"), Some(3500));
        assert_eq!(mobile_de_make_code("Mercedes-Benz"), Some(17200));
    }

    #[test]
    fn unknown_make_yields_none() {
        assert_eq!(mobile_de_make_code("NotARealMake"), None);
    }
}
