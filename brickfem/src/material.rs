//! Continuum material records shared by elements.

use std::convert::TryFrom;

use nalgebra::{Cholesky, Matrix6, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::solid::materials::{LameParameters, YoungPoisson};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialHandle(pub(crate) usize);

impl MaterialHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Rayleigh damping coefficients, giving the damping matrix `mass * M + stiffness * K`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RayleighDamping {
    pub mass: f64,
    pub stiffness: f64,
}

/// Plain parameter record used for (de)serialization of [`Material`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialParameters {
    pub density: f64,
    /// Young's moduli `(Ex, Ey, Ez)`.
    pub young: Vector3<f64>,
    /// Poisson ratios `(nu_xy, nu_xz, nu_yz)`.
    pub poisson: Vector3<f64>,
    /// Shear moduli `(G_xy, G_xz, G_yz)`.
    pub shear: Vector3<f64>,
    #[serde(default)]
    pub rayleigh: RayleighDamping,
}

/// An immutable, validated elastic material.
///
/// The material is orthotropic in general, with the isotropic case as the common special case.
/// The Voigt elasticity tensor uses the ordering `xx, yy, zz, xy, xz, yz` with engineering
/// shear strains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MaterialParameters", into = "MaterialParameters")]
pub struct Material {
    parameters: MaterialParameters,
    elasticity: Matrix6<f64>,
}

impl Material {
    /// Isotropic material with the shear modulus derived from `young` and `poisson`.
    pub fn isotropic(density: f64, young: f64, poisson: f64) -> Result<Self, ConfigurationError> {
        let shear = young / (2.0 * (1.0 + poisson));
        Self::isotropic_with_shear_modulus(density, young, poisson, shear)
    }

    /// Isotropic Young's modulus and Poisson ratio with an independently specified shear modulus.
    pub fn isotropic_with_shear_modulus(
        density: f64,
        young: f64,
        poisson: f64,
        shear: f64,
    ) -> Result<Self, ConfigurationError> {
        Self::orthotropic(
            density,
            Vector3::repeat(young),
            Vector3::repeat(poisson),
            Vector3::repeat(shear),
        )
    }

    pub fn orthotropic(
        density: f64,
        young: Vector3<f64>,
        poisson: Vector3<f64>,
        shear: Vector3<f64>,
    ) -> Result<Self, ConfigurationError> {
        Self::try_from(MaterialParameters {
            density,
            young,
            poisson,
            shear,
            rayleigh: RayleighDamping::default(),
        })
    }

    pub fn with_rayleigh_damping(mut self, mass: f64, stiffness: f64) -> Result<Self, ConfigurationError> {
        if !(mass >= 0.0 && stiffness >= 0.0) {
            return Err(ConfigurationError::InvalidMaterial(format!(
                "Rayleigh damping coefficients must be non-negative, got ({}, {})",
                mass, stiffness
            )));
        }
        self.parameters.rayleigh = RayleighDamping { mass, stiffness };
        Ok(self)
    }

    pub fn density(&self) -> f64 {
        self.parameters.density
    }

    pub fn young(&self) -> Vector3<f64> {
        self.parameters.young
    }

    pub fn poisson(&self) -> Vector3<f64> {
        self.parameters.poisson
    }

    pub fn shear(&self) -> Vector3<f64> {
        self.parameters.shear
    }

    pub fn rayleigh_damping(&self) -> RayleighDamping {
        self.parameters.rayleigh
    }

    pub fn parameters(&self) -> &MaterialParameters {
        &self.parameters
    }

    /// The 6x6 Voigt elasticity tensor relating Green-Lagrange strain to second Piola-Kirchhoff stress.
    pub fn elasticity_tensor(&self) -> &Matrix6<f64> {
        &self.elasticity
    }

    /// Isotropic Lamé parameters based on the first Young's modulus and Poisson ratio.
    pub fn lame_parameters(&self) -> LameParameters<f64> {
        LameParameters::from(YoungPoisson {
            young: self.parameters.young.x,
            poisson: self.parameters.poisson.x,
        })
    }
}

impl TryFrom<MaterialParameters> for Material {
    type Error = ConfigurationError;

    fn try_from(parameters: MaterialParameters) -> Result<Self, Self::Error> {
        let invalid = |msg: String| Err(ConfigurationError::InvalidMaterial(msg));
        if !(parameters.density > 0.0 && parameters.density.is_finite()) {
            return invalid(format!("density must be positive, got {}", parameters.density));
        }
        if !parameters.young.iter().all(|e| *e > 0.0 && e.is_finite()) {
            return invalid(format!("Young's moduli must be positive, got {:?}", parameters.young));
        }
        if !parameters.shear.iter().all(|g| *g > 0.0 && g.is_finite()) {
            return invalid(format!("shear moduli must be positive, got {:?}", parameters.shear));
        }
        if !parameters.poisson.iter().all(|nu| nu.is_finite()) {
            return invalid(format!("Poisson ratios must be finite, got {:?}", parameters.poisson));
        }

        let elasticity = orthotropic_elasticity_tensor(&parameters.young, &parameters.poisson, &parameters.shear)
            .ok_or_else(|| {
                ConfigurationError::InvalidMaterial(format!(
                    "elasticity tensor for E = {:?}, nu = {:?}, G = {:?} is not positive definite",
                    parameters.young, parameters.poisson, parameters.shear
                ))
            })?;

        Ok(Self { parameters, elasticity })
    }
}

impl From<Material> for MaterialParameters {
    fn from(material: Material) -> Self {
        material.parameters
    }
}

/// Inverts the orthotropic compliance matrix. Returns `None` unless the result is positive definite.
fn orthotropic_elasticity_tensor(
    young: &Vector3<f64>,
    poisson: &Vector3<f64>,
    shear: &Vector3<f64>,
) -> Option<Matrix6<f64>> {
    let (ex, ey, ez) = (young.x, young.y, young.z);
    let (nu_xy, nu_xz, nu_yz) = (poisson.x, poisson.y, poisson.z);

    let mut compliance = Matrix6::zeros();
    compliance[(0, 0)] = 1.0 / ex;
    compliance[(1, 1)] = 1.0 / ey;
    compliance[(2, 2)] = 1.0 / ez;
    compliance[(0, 1)] = -nu_xy / ex;
    compliance[(0, 2)] = -nu_xz / ex;
    compliance[(1, 2)] = -nu_yz / ey;
    compliance[(1, 0)] = compliance[(0, 1)];
    compliance[(2, 0)] = compliance[(0, 2)];
    compliance[(2, 1)] = compliance[(1, 2)];
    compliance[(3, 3)] = 1.0 / shear.x;
    compliance[(4, 4)] = 1.0 / shear.y;
    compliance[(5, 5)] = 1.0 / shear.z;

    let elasticity = compliance.try_inverse()?;
    let elasticity = (elasticity + elasticity.transpose()) * 0.5;
    Cholesky::new(elasticity).map(|_| elasticity)
}
