//! Staff account form checks. Which fields are required depends on the
//! selected role, so validation is a pure function of role and values.

use std::str::FromStr;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    ChefDepartement,
    ChefPole,
    DirecteurEtudes,
    ResponsableScolarite,
}

impl Role {
    /// Numeric code used by the backend.
    pub fn code(self) -> u8 {
        match self {
            Self::Admin => 0,
            Self::ChefDepartement => 1,
            Self::ChefPole => 2,
            Self::DirecteurEtudes => 3,
            Self::ResponsableScolarite => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::ChefDepartement => "CHEF_DEPT",
            Self::ChefPole => "CHEF_POLE",
            Self::DirecteurEtudes => "DE",
            Self::ResponsableScolarite => "RS",
        }
    }

    const ALL: [Role; 5] = [
        Self::Admin,
        Self::ChefDepartement,
        Self::ChefPole,
        Self::DirecteurEtudes,
        Self::ResponsableScolarite,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rôle inconnu: {0}")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    /// Accepts the numeric code, the name, or the name with a `ROLE_` prefix.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let name = value.strip_prefix("ROLE_").unwrap_or(value);
        Self::ALL
            .into_iter()
            .find(|role| role.name().eq_ignore_ascii_case(name) || role.code().to_string() == name)
            .ok_or_else(|| UnknownRole(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    /// The existing password is kept when none is given.
    Edit,
}

#[derive(Debug, Clone, Default)]
pub struct MemberForm {
    pub nom: String,
    pub prenom: String,
    pub email: String,
    pub password: Option<String>,
    pub role: Option<Role>,
    pub departement_id: Option<i64>,
    pub pole_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Nom,
    Prenom,
    Email,
    Password,
    Role,
    Departement,
    Pole,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("champ obligatoire: {0:?}")]
    Required(Field),

    #[error("adresse e-mail invalide")]
    InvalidEmail,

    #[error("le mot de passe doit contenir au moins {min} caractères")]
    PasswordTooShort { min: usize },
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain.split('.').all(|label| !label.is_empty())
}

pub fn validate(form: &MemberForm, mode: FormMode) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (field, value) in [(Field::Nom, &form.nom), (Field::Prenom, &form.prenom)] {
        if is_blank(value) {
            errors.push(FieldError::Required(field));
        }
    }

    if is_blank(&form.email) {
        errors.push(FieldError::Required(Field::Email));
    } else if !looks_like_email(form.email.trim()) {
        errors.push(FieldError::InvalidEmail);
    }

    match (form.password.as_deref(), mode) {
        (None, FormMode::Create) => errors.push(FieldError::Required(Field::Password)),
        (Some(password), FormMode::Create) if password.is_empty() => {
            errors.push(FieldError::Required(Field::Password))
        }
        (Some(password), _) if !password.is_empty() && password.chars().count() < MIN_PASSWORD_LEN => {
            errors.push(FieldError::PasswordTooShort {
                min: MIN_PASSWORD_LEN,
            })
        }
        _ => {}
    }

    match form.role {
        None => errors.push(FieldError::Required(Field::Role)),
        Some(Role::ChefDepartement) if form.departement_id.is_none() => {
            errors.push(FieldError::Required(Field::Departement))
        }
        Some(Role::ChefPole) if form.pole_id.is_none() => errors.push(FieldError::Required(Field::Pole)),
        Some(_) => {}
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(role: Role) -> MemberForm {
        MemberForm {
            nom: "Sidi".to_string(),
            prenom: "Ahmed".to_string(),
            email: "ahmed.sidi@esp.mr".to_string(),
            password: Some("secret1".to_string()),
            role: Some(role),
            departement_id: None,
            pole_id: None,
        }
    }

    #[test]
    fn roles_parse_from_codes_and_names() {
        assert_eq!("1".parse::<Role>(), Ok(Role::ChefDepartement));
        assert_eq!("CHEF_POLE".parse::<Role>(), Ok(Role::ChefPole));
        assert_eq!("ROLE_CHEF_POLE".parse::<Role>(), Ok(Role::ChefPole));
        assert_eq!("rs".parse::<Role>(), Ok(Role::ResponsableScolarite));
        assert!("9".parse::<Role>().is_err());
    }

    #[test]
    fn department_head_needs_a_department() {
        let mut chef = form(Role::ChefDepartement);
        assert_eq!(
            validate(&chef, FormMode::Create),
            vec![FieldError::Required(Field::Departement)]
        );

        chef.departement_id = Some(2);
        assert!(validate(&chef, FormMode::Create).is_empty());
    }

    #[test]
    fn pole_head_needs_a_pole() {
        let chef = form(Role::ChefPole);
        assert_eq!(
            validate(&chef, FormMode::Create),
            vec![FieldError::Required(Field::Pole)]
        );
    }

    #[test]
    fn other_roles_need_neither() {
        for role in [Role::Admin, Role::DirecteurEtudes, Role::ResponsableScolarite] {
            assert!(validate(&form(role), FormMode::Create).is_empty());
        }
    }

    #[test]
    fn password_is_optional_when_editing() {
        let mut admin = form(Role::Admin);
        admin.password = None;
        assert_eq!(
            validate(&admin, FormMode::Create),
            vec![FieldError::Required(Field::Password)]
        );
        assert!(validate(&admin, FormMode::Edit).is_empty());

        admin.password = Some("abc".to_string());
        assert_eq!(
            validate(&admin, FormMode::Edit),
            vec![FieldError::PasswordTooShort { min: 6 }]
        );
    }

    #[test]
    fn identity_and_email_are_checked() {
        let blank = MemberForm {
            email: "not an email".to_string(),
            ..MemberForm::default()
        };
        let errors = validate(&blank, FormMode::Create);
        assert!(errors.contains(&FieldError::Required(Field::Nom)));
        assert!(errors.contains(&FieldError::Required(Field::Prenom)));
        assert!(errors.contains(&FieldError::InvalidEmail));
        assert!(errors.contains(&FieldError::Required(Field::Role)));
    }
}
