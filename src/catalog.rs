use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Default catalog shipped with the crate, used when no path is configured.
pub const DEFAULT_CATALOG_JSON: &str = include_str!("../data/catalog.json");

#[derive(Debug, Clone, Deserialize)]
pub struct CompanyEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub ticker_nse: String,
    #[serde(default)]
    pub ticker_bse: Option<String>,
    pub sector: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegulatorEntry {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Sectors under this regulator's jurisdiction. May be empty for
    /// case-specific bodies, which then produce no regulatory impacts.
    pub sectors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    companies: Vec<CompanyEntry>,
    regulators: Vec<RegulatorEntry>,
    sectors: HashMap<String, Vec<String>>,
    supply_chain: HashMap<String, Vec<String>>,
}

/// Static reference data: company/ticker/sector mappings, regulators,
/// sector keyword sets, and the supply-chain adjacency graph.
///
/// Loaded once at process start; schema validation failure is fatal.
/// Read-only afterwards — no mutation path exists at runtime.
#[derive(Debug)]
pub struct EntityCatalog {
    companies: Vec<CompanyEntry>,
    regulators: Vec<RegulatorEntry>,
    sectors: HashMap<String, Vec<String>>,
    supply_chain: HashMap<String, Vec<String>>,

    alias_to_company: HashMap<String, usize>,
    ticker_to_company: HashMap<String, usize>,
    sector_to_companies: HashMap<String, Vec<usize>>,
    alias_to_regulator: HashMap<String, usize>,
    sector_to_regulators: HashMap<String, Vec<usize>>,
}

impl EntityCatalog {
    pub fn load(path: &str) -> Result<Self> {
        let json = if Path::new(path).exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read catalog file '{}'", path))?
        } else {
            info!("catalog file '{}' not found, using built-in catalog", path);
            DEFAULT_CATALOG_JSON.to_string()
        };
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(json).context("catalog schema validation failed")?;
        Self::validate(&file)?;

        let mut alias_to_company = HashMap::new();
        let mut ticker_to_company = HashMap::new();
        let mut sector_to_companies: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, company) in file.companies.iter().enumerate() {
            alias_to_company.insert(company.name.to_lowercase(), idx);
            for alias in &company.aliases {
                alias_to_company.insert(alias.to_lowercase(), idx);
            }
            ticker_to_company.insert(company.ticker_nse.to_uppercase(), idx);
            sector_to_companies
                .entry(company.sector.clone())
                .or_default()
                .push(idx);
        }

        let mut alias_to_regulator = HashMap::new();
        let mut sector_to_regulators: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, regulator) in file.regulators.iter().enumerate() {
            alias_to_regulator.insert(regulator.name.to_lowercase(), idx);
            for alias in &regulator.aliases {
                alias_to_regulator.insert(alias.to_lowercase(), idx);
            }
            for sector in &regulator.sectors {
                sector_to_regulators
                    .entry(sector.clone())
                    .or_default()
                    .push(idx);
            }
        }

        info!(
            companies = file.companies.len(),
            regulators = file.regulators.len(),
            sectors = file.sectors.len(),
            "entity catalog loaded"
        );

        Ok(EntityCatalog {
            companies: file.companies,
            regulators: file.regulators,
            sectors: file.sectors,
            supply_chain: file.supply_chain,
            alias_to_company,
            ticker_to_company,
            sector_to_companies,
            alias_to_regulator,
            sector_to_regulators,
        })
    }

    fn validate(file: &CatalogFile) -> Result<()> {
        if file.companies.is_empty() {
            return Err(anyhow!("catalog has no companies"));
        }
        let mut seen_names = std::collections::HashSet::new();
        for company in &file.companies {
            if company.name.trim().is_empty() || company.ticker_nse.trim().is_empty() {
                return Err(anyhow!(
                    "company entry with empty name or ticker: '{}'",
                    company.name
                ));
            }
            if !seen_names.insert(company.name.to_lowercase()) {
                return Err(anyhow!("duplicate company name '{}'", company.name));
            }
            if !file.sectors.contains_key(&company.sector) {
                return Err(anyhow!(
                    "company '{}' references unknown sector '{}'",
                    company.name,
                    company.sector
                ));
            }
        }
        for regulator in &file.regulators {
            for sector in &regulator.sectors {
                if !file.sectors.contains_key(sector) {
                    return Err(anyhow!(
                        "regulator '{}' references unknown sector '{}'",
                        regulator.name,
                        sector
                    ));
                }
            }
        }
        for (source, targets) in &file.supply_chain {
            if !file.sectors.contains_key(source) {
                return Err(anyhow!("supply chain source '{}' is not a sector", source));
            }
            for target in targets {
                if !file.sectors.contains_key(target) {
                    return Err(anyhow!(
                        "supply chain target '{}' (from '{}') is not a sector",
                        target,
                        source
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn company_by_alias(&self, alias: &str) -> Option<&CompanyEntry> {
        self.alias_to_company
            .get(&alias.to_lowercase())
            .map(|&idx| &self.companies[idx])
    }

    pub fn company_by_ticker(&self, ticker: &str) -> Option<&CompanyEntry> {
        self.ticker_to_company
            .get(&ticker.to_uppercase())
            .map(|&idx| &self.companies[idx])
    }

    pub fn companies_in_sector(&self, sector: &str) -> Vec<&CompanyEntry> {
        self.sector_to_companies
            .get(sector)
            .map(|idxs| idxs.iter().map(|&i| &self.companies[i]).collect())
            .unwrap_or_default()
    }

    pub fn regulator_by_alias(&self, alias: &str) -> Option<&RegulatorEntry> {
        self.alias_to_regulator
            .get(&alias.to_lowercase())
            .map(|&idx| &self.regulators[idx])
    }

    pub fn regulators_for_sector(&self, sector: &str) -> Vec<&RegulatorEntry> {
        self.sector_to_regulators
            .get(sector)
            .map(|idxs| idxs.iter().map(|&i| &self.regulators[i]).collect())
            .unwrap_or_default()
    }

    pub fn sector_keywords(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.sectors.iter()
    }

    pub fn is_sector(&self, name: &str) -> bool {
        self.sectors.contains_key(name)
    }

    /// Immediate downstream sectors for supply-chain propagation. One hop
    /// only — callers must not chain these.
    pub fn downstream_sectors(&self, sector: &str) -> &[String] {
        self.supply_chain
            .get(sector)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All company aliases (including canonical names), longest first so
    /// regex alternation prefers the most specific match.
    pub fn company_aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self.alias_to_company.keys().map(String::as_str).collect();
        aliases.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        aliases
    }

    pub fn regulator_aliases(&self) -> Vec<&str> {
        let mut aliases: Vec<&str> = self.alias_to_regulator.keys().map(String::as_str).collect();
        aliases.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        aliases
    }

    pub fn companies(&self) -> &[CompanyEntry] {
        &self.companies
    }
}
