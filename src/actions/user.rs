// src/actions/user.rs

//! Accounts: `user` and `group` actions edit the image's passwd and group files

use super::handler::ActionHandler;
use super::{Action, IndexEntry};
use crate::error::{Error, Result};
use crate::image::{ColonFile, Image, PkgPlan};
use std::collections::BTreeSet;
use tracing::debug;

/// User attributes that are never repeated
const USER_SINGLE_ATTRS: &[&str] = &[
    "password",
    "uid",
    "group",
    "gcos-field",
    "home-dir",
    "login-shell",
    "ftpuser",
];

/// passwd columns copied from the action as they are
const PASSWD_TEXT_FIELDS: &[&str] = &["gcos-field", "home-dir", "login-shell"];

fn execution_error(action: &Action, message: String) -> Error {
    Error::ActionExecution {
        action: action.to_string(),
        message,
        errno: None,
        ignoreerrno: false,
    }
}

fn numeric_errors(action: &Action, attrs: &[&str]) -> Vec<String> {
    attrs
        .iter()
        .filter_map(|attr| {
            let value = action.get_str(attr)?;
            value
                .parse::<u32>()
                .is_err()
                .then(|| format!("{} must be a number, not '{}'", attr, value))
        })
        .collect()
}

fn single_errors(action: &Action, attrs: &[&str]) -> Vec<String> {
    attrs
        .iter()
        .filter(|attr| action.get(attr).is_some_and(|v| v.is_list()))
        .map(|attr| format!("{} may only be specified once", attr))
        .collect()
}

/// Groups whose member list names `username`
fn memberships(groups: &ColonFile, username: &str) -> BTreeSet<String> {
    groups
        .keys()
        .into_iter()
        .filter(|g| {
            groups
                .get_field(g, "user-list")
                .is_some_and(|list| list.split(',').any(|u| u == username))
        })
        .collect()
}

/// Add or drop `username` in a group's member list
fn set_membership(groups: &mut ColonFile, group: &str, username: &str, member: bool) {
    let Some(list) = groups.get_field(group, "user-list") else {
        return;
    };
    let mut users: Vec<&str> = list.split(',').filter(|u| !u.is_empty() && *u != username).collect();
    if member {
        users.push(username);
    }
    groups.set_field(group, "user-list", &users.join(","));
}

/// Compare expected and on-disk values, `<missing>` when there is no entry
fn field_errors(checks: Vec<(&str, String, String)>) -> Vec<String> {
    checks
        .into_iter()
        .filter(|(_, found, expected)| found != expected)
        .map(|(attr, found, expected)| format!("{}: '{}' should be '{}'", attr, found, expected))
        .collect()
}

pub struct UserHandler;

impl UserHandler {
    fn gid_for(action: &Action, image: &Image) -> Result<u32> {
        let name = action
            .get_str("group")
            .ok_or_else(|| execution_error(action, "group attribute is required".to_string()))?;
        image
            .get_group_by_name(name)?
            .ok_or_else(|| execution_error(action, format!("Unknown group '{}'", name)))
    }
}

impl ActionHandler for UserHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("username")
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        let mut errors = single_errors(action, USER_SINGLE_ATTRS);
        errors.extend(numeric_errors(action, &["uid"]));
        errors
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            "user",
            "name",
            action.get_str("username").unwrap_or_default(),
            None,
        )]
    }

    /// Merge the action into passwd, keeping on-disk values the action leaves open
    ///
    /// An existing password always wins over the action's.
    fn install(&self, action: &Action, plan: &PkgPlan<'_>, orig: Option<&Action>) -> Result<()> {
        let username = action.get_str("username").unwrap_or_default();
        let gid = Self::gid_for(action, plan.image)?.to_string();
        let mut passwd = plan.image.passwd()?;
        let mut groups = plan.image.group()?;
        let on_disk = |field: &str| passwd.get_field(username, field).filter(|v| !v.is_empty());

        let uid = match action.get_str("uid").map(str::to_string).or_else(|| on_disk("uid")) {
            Some(uid) => uid,
            None => passwd
                .next_free_id("uid")
                .ok_or_else(|| execution_error(action, "No free system uids".to_string()))?
                .to_string(),
        };
        let password = on_disk("password")
            .or_else(|| action.get_str("password").map(str::to_string))
            .unwrap_or_else(|| "x".to_string());

        let mut values: Vec<(&str, String)> = vec![
            ("username", username.to_string()),
            ("password", password),
            ("uid", uid),
            ("gid", gid),
        ];
        for field in PASSWD_TEXT_FIELDS {
            let value = action
                .get_str(field)
                .map(str::to_string)
                .or_else(|| on_disk(field))
                .unwrap_or_default();
            values.push((*field, value));
        }
        let values: Vec<(&str, &str)> = values.iter().map(|(f, v)| (*f, v.as_str())).collect();
        passwd.set(&values);

        // memberships the old version asked for and this one does not are dropped
        let wanted: BTreeSet<&str> = action.attrlist("group-list").into_iter().collect();
        let dropped: BTreeSet<&str> = orig
            .map(|o| o.attrlist("group-list"))
            .unwrap_or_default()
            .into_iter()
            .filter(|g| !wanted.contains(g))
            .collect();
        for group in groups.keys() {
            if wanted.contains(group.as_str()) {
                set_membership(&mut groups, &group, username, true);
            } else if dropped.contains(group.as_str()) {
                set_membership(&mut groups, &group, username, false);
            }
        }

        passwd.write()?;
        groups.write()?;
        debug!("Wrote passwd entry for {}", username);
        Ok(())
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let username = action.get_str("username").unwrap_or_default();
        let passwd = plan.image.passwd()?;
        let groups = plan.image.group()?;
        let found = |field: &str| {
            passwd
                .get_field(username, field)
                .unwrap_or_else(|| "<missing>".to_string())
        };

        let mut checks = Vec::new();
        if let Some(uid) = action.get_str("uid") {
            checks.push(("uid", found("uid"), uid.to_string()));
        }
        if let Some(group) = action.get_str("group") {
            let on_disk = passwd
                .get_field(username, "gid")
                .and_then(|g| g.parse().ok())
                .map(|gid| plan.image.get_name_by_gid(gid))
                .unwrap_or_else(|| "<missing>".to_string());
            checks.push(("group", on_disk, group.to_string()));
        }
        for field in PASSWD_TEXT_FIELDS {
            if let Some(expected) = action.get_str(field) {
                checks.push((*field, found(field), expected.to_string()));
            }
        }
        if action.get("group-list").is_some() {
            let mut expected = action.attrlist("group-list");
            expected.sort();
            let on_disk: Vec<String> = memberships(&groups, username).into_iter().collect();
            checks.push(("group-list", on_disk.join(","), expected.join(",")));
        }
        Ok(field_errors(checks))
    }

    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let username = action.get_str("username").unwrap_or_default();
        let mut passwd = plan.image.passwd()?;
        let mut groups = plan.image.group()?;
        if !passwd.remove(username) {
            debug!("User {} already gone", username);
        }
        for group in memberships(&groups, username) {
            set_membership(&mut groups, &group, username, false);
        }
        passwd.write()?;
        groups.write()
    }
}

pub struct GroupHandler;

impl ActionHandler for GroupHandler {
    fn key_attr(&self) -> Option<&'static str> {
        Some("groupname")
    }

    fn validate(&self, action: &Action) -> Vec<String> {
        let mut errors = single_errors(action, &["gid", "password"]);
        errors.extend(numeric_errors(action, &["gid"]));
        errors
    }

    fn generate_indices(&self, action: &Action) -> Vec<IndexEntry> {
        vec![IndexEntry::new(
            "group",
            "name",
            action.get_str("groupname").unwrap_or_default(),
            None,
        )]
    }

    /// Add the group unless it already exists; an existing gid is kept
    fn install(&self, action: &Action, plan: &PkgPlan<'_>, _orig: Option<&Action>) -> Result<()> {
        let groupname = action.get_str("groupname").unwrap_or_default();
        let mut groups = plan.image.group()?;
        if groups.get(groupname).is_some() {
            debug!("Group {} already present", groupname);
            return Ok(());
        }
        let gid = match action.get_str("gid") {
            Some(gid) => gid.to_string(),
            None => groups
                .next_free_id("gid")
                .ok_or_else(|| execution_error(action, "No free system gids".to_string()))?
                .to_string(),
        };
        groups.set(&[("groupname", groupname), ("gid", gid.as_str())]);
        groups.write()
    }

    fn verify(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<Vec<String>> {
        let groupname = action.get_str("groupname").unwrap_or_default();
        let groups = plan.image.group()?;
        let Some(on_disk) = groups.get_field(groupname, "gid") else {
            return Ok(vec![format!("groupname: '<missing>' should be '{}'", groupname)]);
        };
        let mut checks = Vec::new();
        if let Some(gid) = action.get_str("gid") {
            checks.push(("gid", on_disk, gid.to_string()));
        }
        Ok(field_errors(checks))
    }

    /// Groups that still have members are left in place
    fn remove(&self, action: &Action, plan: &PkgPlan<'_>) -> Result<()> {
        let groupname = action.get_str("groupname").unwrap_or_default();
        let mut groups = plan.image.group()?;
        let members = groups.get_field(groupname, "user-list").unwrap_or_default();
        if !members.is_empty() {
            debug!("Group {} still has members: {}", groupname, members);
            return Ok(());
        }
        if groups.remove(groupname) {
            groups.write()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn act(s: &str) -> Action {
        s.parse().unwrap()
    }

    fn seeded_image() -> (tempfile::TempDir, Image) {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        fs::write(
            dir.path().join("etc/passwd"),
            "root:x:0:0:Super-User:/root:/bin/sh\n",
        )
        .unwrap();
        fs::write(dir.path().join("etc/group"), "root::0:\nother::1:\nsys::3:root\n").unwrap();
        let image = Image::new(dir.path());
        (dir, image)
    }

    #[test]
    fn test_indices_and_validate() {
        let u = act("user username=webservd uid=80 group=webservd");
        assert_eq!(u.generate_indices(), vec![IndexEntry::new("user", "name", "webservd", None)]);
        assert!(u.validate().is_ok());
        assert!(act("user username=web uid=eighty").validate().is_err());

        let g = act("group groupname=webservd gid=80");
        assert_eq!(g.generate_indices()[0].action_type, "group");
        assert!(act("group groupname=web gid=x").validate().is_err());
    }

    #[test]
    fn test_group_lifecycle() {
        let (dir, image) = seeded_image();
        let plan = PkgPlan::new(&image, None);

        let g = act("group groupname=webservd gid=80");
        assert_eq!(
            g.verify(&plan).unwrap(),
            vec!["groupname: '<missing>' should be 'webservd'"]
        );
        g.install(&plan, None).unwrap();
        assert!(g.verify(&plan).unwrap().is_empty());
        assert_eq!(image.get_group_by_name("webservd").unwrap(), Some(80));

        let dynamic = act("group groupname=daemon");
        dynamic.install(&plan, None).unwrap();
        assert_eq!(image.get_group_by_name("daemon").unwrap(), Some(2));

        g.remove(&plan).unwrap();
        let content = fs::read_to_string(dir.path().join("etc/group")).unwrap();
        assert!(!content.contains("webservd"));
    }

    #[test]
    fn test_user_lifecycle() {
        let (dir, image) = seeded_image();
        let plan = PkgPlan::new(&image, None);

        act("group groupname=webservd gid=80").install(&plan, None).unwrap();
        let u = act(
            "user username=webservd uid=80 group=webservd home-dir=/var/www \
             login-shell=/bin/false group-list=sys",
        );
        u.install(&plan, None).unwrap();
        assert!(u.verify(&plan).unwrap().is_empty());

        let passwd = fs::read_to_string(dir.path().join("etc/passwd")).unwrap();
        assert!(passwd.contains("webservd:x:80:80::/var/www:/bin/false"));
        let group = fs::read_to_string(dir.path().join("etc/group")).unwrap();
        assert!(group.contains("sys::3:root,webservd"));

        let moved = act("user username=webservd uid=80 group=webservd home-dir=/srv/www");
        assert_eq!(
            moved.verify(&plan).unwrap(),
            vec!["home-dir: '/var/www' should be '/srv/www'"]
        );

        // dropping a group-list entry from the new version takes the user out
        moved.install(&plan, Some(&u)).unwrap();
        assert!(moved.verify(&plan).unwrap().is_empty());
        let group = fs::read_to_string(dir.path().join("etc/group")).unwrap();
        assert!(group.contains("sys::3:root\n"));

        moved.remove(&plan).unwrap();
        assert!(image.passwd().unwrap().get("webservd").is_none());
        moved.remove(&plan).unwrap();
    }

    #[test]
    fn test_user_needs_known_group() {
        let (_dir, image) = seeded_image();
        let plan = PkgPlan::new(&image, None);
        let u = act("user username=svc group=nosuchgroup-xyz");
        assert!(matches!(
            u.install(&plan, None),
            Err(Error::ActionExecution { .. })
        ));
    }
}
