use serde::{Deserialize, Serialize};

use log::info;

use crate::err::*;
use crate::optimizers::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    #[serde(rename = "type")]
    pub optim_type: String,
    /// Optimizer default when unset
    pub learning_rate: Option<f32>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            optim_type: "adam".to_owned(),
            learning_rate: None,
        }
    }
}

pub fn optimizer_from_type(opt_type: &str) -> Result<Box<dyn Optimizer>, OsrError> {
    match opt_type {
        "adam" => Ok(Box::new(OptimizerAdam::default())),
        "sgd" => Ok(Box::new(OptimizerSGD::default())),
        _ => Err(OsrError::WrongArg),
    }
}

pub fn optimizer_from_config(cfg: &OptimizerConfig) -> Result<Box<dyn Optimizer>, OsrError> {
    let mut optim = optimizer_from_type(cfg.optim_type.as_str())?;

    if let Some(lr) = cfg.learning_rate {
        optim.set_learn_rate(lr);
    }

    info!("Setting optimizer : {}, learning rate : {}", optim.optimizer_type(), optim.learn_rate());

    Ok(optim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_from_type() {
        assert_eq!(optimizer_from_type("adam").unwrap().learn_rate(), 2e-3);
        assert_eq!(optimizer_from_type("sgd").unwrap().optimizer_type(), "sgd");
        assert!(matches!(optimizer_from_type("rmsprop"), Err(OsrError::WrongArg)));
    }

    #[test]
    fn test_config_overrides_learn_rate() {
        let cfg: OptimizerConfig = serde_yaml::from_str("type: sgd\nlearning_rate: 0.5\n").unwrap();
        let optim = optimizer_from_config(&cfg).unwrap();

        assert_eq!(optim.optimizer_type(), "sgd");
        assert_eq!(optim.learn_rate(), 0.5);
        assert_eq!(OptimizerConfig::default().optim_type, "adam");
    }
}
