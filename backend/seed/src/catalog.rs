/// Fertilizers commonly stocked by a shop, each with the companies that sell it.
pub const CATALOG: &[(&str, &[&str])] = &[
    ("Urea", &["IPL", "Uttam", "Matrix", "Kisan", "HURL", "Sardar", "KRIBHCO", "RCF", "BBCL"]),
    ("DAP", &["IPL", "Kisan", "KRIBHCO", "Sardar", "Uttam", "HURL", "PPL", "Paras", "RCF"]),
    ("MOP (Potash)", &["Matrix", "IPL", "Kisan", "Sardar", "Uttam", "Paras", "Mosaic"]),
    ("Zinc", &["Paras", "PPL", "Kisan", "Matrix", "BBCL", "Uttam", "IPL"]),
    ("Boron", &["Paras", "Shriram"]),
    ("Sulphur", &["Uttam", "Kisan"]),
    ("Magnesium", &["Uttam", "HURL", "Kisan"]),
    ("Calcium", &["Mukta", "BBCL", "HURL", "Uttam", "Matrix", "Yara", "Mosaic", "Paras"]),
    ("NPK", &["Paras", "Kisan", "Uttam", "PPL", "IPL", "Matrix", "HURL", "BBCL", "Mukta"]),
    ("SSP", &["Paras", "Khaitan", "HURL", "IPL", "PPL"]),
    ("Polyhalite", &["IPL"]),
    ("TSP", &["HURL", "PPL", "IPL"]),
    ("Zyam", &["Paras", "PPL", "Matrix", "HURL", "Uttam", "Kisan"]),
    ("Apna Power", &["HURL", "Uttam"]),
    ("Micro Raja", &["PPL"]),
    ("Jaivik Khali", &["Paras", "Kisan", "Dayal"]),
    ("Neem Khali", &["SPIC"]),
    (
        "Wheat Seed",
        &["Shriram", "Pantnagar", "Shreedha", "Sardar", "Kisan", "Uttam", "KRIBHCO", "Sonali Gold", "Nandini"],
    ),
];

pub const SEED_UNIT: &str = "Bag";

pub fn entries() -> impl Iterator<Item = (&'static str, &'static str)> {
    CATALOG
        .iter()
        .flat_map(|(item, companies)| companies.iter().map(move |company| (*item, *company)))
}
