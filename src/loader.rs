//! File-based input loading
//!
//! The deal bundle travels as JSON; yield-curve tenors and asset
//! positions can also arrive as flat CSV files.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::assets::{Amortization, Asset, AssetFlags, AssetKind, RateSpec, Seniority};
use crate::deal::DealConfig;
use crate::error::{EngineError, EngineResult};
use crate::ratings::{RatingHistory, RatingInputs};
use crate::time::{BusinessDayConvention, DayCount, PaymentFrequency};

/// Load a full deal configuration from a JSON file.
pub fn load_deal_config(path: &Path) -> EngineResult<DealConfig> {
    let file = File::open(path)
        .map_err(|e| EngineError::input(format!("cannot open {}: {e}", path.display())))?;
    let config: DealConfig = serde_json::from_reader(file)
        .map_err(|e| EngineError::input(format!("bad deal config {}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}

/// Load a sparse tenor curve from a `month,rate` CSV.
pub fn load_rate_curve(path: &Path) -> EngineResult<BTreeMap<u32, f64>> {
    let file = File::open(path)
        .map_err(|e| EngineError::input(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut curve = BTreeMap::new();
    for result in reader.records() {
        let record = result.map_err(|e| EngineError::input(e.to_string()))?;
        let month: u32 = record
            .get(0)
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| EngineError::input(format!("bad tenor month in {}", path.display())))?;
        let rate: f64 = record
            .get(1)
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| EngineError::input(format!("bad rate in {}", path.display())))?;
        curve.insert(month, rate);
    }
    if curve.is_empty() {
        return Err(EngineError::input(format!(
            "{} holds no curve points",
            path.display()
        )));
    }
    Ok(curve)
}

/// One asset row in the positions CSV
#[derive(Debug, Deserialize)]
struct AssetRecord {
    id: String,
    issuer_id: String,
    issue_name: String,
    kind: String,
    seniority: String,
    par_amount: f64,
    dated_date: NaiveDate,
    first_payment_date: NaiveDate,
    maturity_date: NaiveDate,
    payment_frequency: u32,
    day_count: String,
    coupon_type: String,
    #[serde(default)]
    coupon: f64,
    #[serde(default)]
    spread: f64,
    #[serde(default)]
    floor: f64,
    #[serde(default)]
    moodys_rating: String,
    #[serde(default)]
    sp_rating: String,
    #[serde(default)]
    moodys_industry: String,
    #[serde(default)]
    sp_industry: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    cov_lite: bool,
    #[serde(default)]
    defaulted: bool,
}

/// Load asset positions from CSV.
pub fn load_assets(path: &Path) -> EngineResult<Vec<Asset>> {
    let file = File::open(path)
        .map_err(|e| EngineError::input(format!("cannot open {}: {e}", path.display())))?;
    let mut reader = csv::Reader::from_reader(file);

    let mut assets = Vec::new();
    for result in reader.deserialize::<AssetRecord>() {
        let record = result.map_err(|e| EngineError::input(e.to_string()))?;
        let asset = asset_from_record(record)?;
        asset.validate()?;
        assets.push(asset);
    }
    Ok(assets)
}

fn asset_from_record(record: AssetRecord) -> EngineResult<Asset> {
    let kind = match record.kind.trim().to_uppercase().as_str() {
        "BOND" => AssetKind::Bond,
        "LOAN" => AssetKind::Loan,
        other => {
            return Err(EngineError::input(format!("unknown asset kind: {other}")));
        }
    };
    let seniority = match record.seniority.trim().to_uppercase().as_str() {
        "SENIOR_SECURED" | "SENIOR SECURED" => Seniority::SeniorSecured,
        "SENIOR_UNSECURED" | "SENIOR UNSECURED" => Seniority::SeniorUnsecured,
        "SUBORDINATE" => Seniority::Subordinate,
        other => {
            return Err(EngineError::input(format!("unknown seniority: {other}")));
        }
    };
    let day_count = match record.day_count.trim().to_uppercase().as_str() {
        "30/360" | "30/360US" => DayCount::Us30360,
        "30/360EU" => DayCount::Eu30360,
        "ACT/360" => DayCount::Act360,
        "ACT/365" => DayCount::Act365,
        "ACT/ACT" => DayCount::ActAct,
        other => {
            return Err(EngineError::input(format!("unknown day count: {other}")));
        }
    };
    let rate = match record.coupon_type.trim().to_uppercase().as_str() {
        "FIXED" => RateSpec::Fixed {
            coupon: record.coupon,
        },
        "FLOAT" => RateSpec::Float {
            index_name: "LIBOR".to_string(),
            spread: record.spread,
            floor: record.floor,
            cap: None,
        },
        other => {
            return Err(EngineError::input(format!("unknown coupon type: {other}")));
        }
    };

    Ok(Asset {
        id: record.id,
        issuer_id: record.issuer_id,
        issue_name: record.issue_name,
        kind,
        seniority,
        flags: AssetFlags {
            cov_lite: record.cov_lite,
            default_asset: record.defaulted,
            ..Default::default()
        },
        par_amount: record.par_amount,
        unfunded_amount: 0.0,
        pik_balance: 0.0,
        dated_date: record.dated_date,
        first_payment_date: record.first_payment_date,
        maturity_date: record.maturity_date,
        frequency: PaymentFrequency::from_per_year(record.payment_frequency)?,
        day_count,
        business_day_convention: BusinessDayConvention::None,
        end_of_month: false,
        rate,
        amortization: Amortization::Bullet,
        moodys_rating: record.moodys_rating,
        sp_rating: record.sp_rating,
        rating_inputs: RatingInputs::default(),
        outlook: None,
        rating_history: RatingHistory::default(),
        recovery_rate: None,
        moodys_industry: record.moodys_industry,
        sp_industry: record.sp_industry,
        country: record.country,
        wal: None,
        market_value: None,
        facility_size: None,
        analyst_opinion: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_rate_curve() {
        let path = write_temp(
            "clo_engine_curve_test.csv",
            "month,rate\n3,0.02\n6,0.025\n12,0.03\n",
        );
        let curve = load_rate_curve(&path).unwrap();
        assert_eq!(curve.len(), 3);
        assert_eq!(curve[&6], 0.025);
    }

    #[test]
    fn test_load_assets_round_trip() {
        let csv = "id,issuer_id,issue_name,kind,seniority,par_amount,dated_date,first_payment_date,maturity_date,payment_frequency,day_count,coupon_type,coupon,spread,floor,moodys_rating,sp_rating,moodys_industry,sp_industry,country,cov_lite,defaulted\n\
            L1,ISS-1,Term Loan B,LOAN,SENIOR_SECURED,1000000,2025-01-15,2025-04-15,2030-01-15,4,30/360,FLOAT,0,0.035,0.01,B2,B,Services,Business Services,USA,true,false\n";
        let path = write_temp("clo_engine_assets_test.csv", csv);
        let assets = load_assets(&path).unwrap();

        assert_eq!(assets.len(), 1);
        let asset = &assets[0];
        assert_eq!(asset.id, "L1");
        assert!(asset.flags.cov_lite);
        assert!(matches!(asset.rate, RateSpec::Float { .. }));
        assert_eq!(asset.frequency, PaymentFrequency::Quarterly);
    }

    #[test]
    fn test_bad_kind_rejected() {
        let csv = "id,issuer_id,issue_name,kind,seniority,par_amount,dated_date,first_payment_date,maturity_date,payment_frequency,day_count,coupon_type,coupon,spread,floor\n\
            L1,ISS-1,Note,SWAP,SENIOR_SECURED,1000000,2025-01-15,2025-04-15,2030-01-15,4,30/360,FIXED,0.05,0,0\n";
        let path = write_temp("clo_engine_bad_kind_test.csv", csv);
        assert!(load_assets(&path).is_err());
    }

    #[test]
    fn test_missing_file_is_input_error() {
        let result = load_rate_curve(Path::new("/nonexistent/curve.csv"));
        assert!(matches!(result, Err(EngineError::Input(_))));
    }
}
